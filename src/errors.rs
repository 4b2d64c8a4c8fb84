//! Error types shared by the whole crate.
//!
//! All four kinds are fatal; nothing is recovered mid-step.

error_chain! {
    errors {
        /// Rejected before the simulation starts.
        Config(msg: String) {
            description("invalid configuration")
            display("invalid configuration: {}", msg)
        }
        /// Failure to grow particle storage or scratch buffers.
        Alloc(what: String) {
            description("allocation failure")
            display("unable to allocate {}", what)
        }
        /// A particle crossed more than one cell in a single step.
        NumericOverrun(species: String, di: i32, dj: i32) {
            description("time step violates the CFL envelope")
            display(
                "species '{}' crossed more than one cell in one step (di = {}, dj = {})",
                species, di, dj
            )
        }
        /// A transfer buffer outgrew its reserved headroom.
        CapacityExceeded(what: String) {
            description("transfer buffer overflow")
            display("capacity exceeded for {}", what)
        }
    }
}
