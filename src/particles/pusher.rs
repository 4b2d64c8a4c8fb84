//! Particle advance and charge-conserving current deposition.
//!
//! For every valid particle: gather `E` and `B` with stagger-aware linear
//! weights, rotate the momentum (Boris), push relativistically, then split
//! the trajectory at cell crossings into virtual sub-segments and deposit
//! the current of each one (Villasenor–Buneman).
//!
//! Two execution shapes share the same kernel body: the CPU path runs
//! data-parallel over tiles against the global field arrays, the
//! accelerator path walks its queue's tiles sequentially working from a
//! shared-memory style copy of the `(T+2)²` field halo. Both accumulate
//! into a tile-local `(T+3)²` current buffer that is scattered into the
//! region's `J` at tile end.

use crate::errors::*;
use crate::fields::{Current, Emf};
use crate::grid::{Vec3, VecField};
use crate::particles::species::{tile_slices, Species, TileSliceMut};
use crate::Float;
use num_traits::Zero;
use rayon::prelude::*;

/// Per-step constants of the advance.
#[derive(Clone, Copy)]
struct PushParams<'a> {
    name: &'a str,
    /// `0.5 dt / m_q`
    tem: Float,
    dt_dx: Float,
    dt_dy: Float,
    /// `q dx / dt`
    qnx: Float,
    /// `q dy / dt`
    qny: Float,
    q: Float,
    y_lo: i32,
}

trait EbSource: Sync {
    fn e(&self, i: i32, j: i32) -> Vec3;
    fn b(&self, i: i32, j: i32) -> Vec3;
}

/// Gather directly from the region's field arrays.
struct GlobalEb<'a> {
    e: &'a VecField,
    b: &'a VecField,
}

impl<'a> EbSource for GlobalEb<'a> {
    #[inline]
    fn e(&self, i: i32, j: i32) -> Vec3 {
        self.e.get(i as isize, j as isize)
    }

    #[inline]
    fn b(&self, i: i32, j: i32) -> Vec3 {
        self.b.get(i as isize, j as isize)
    }
}

/// Tile-cached `(T+2)²` halo of `E` and `B`.
struct TileEb {
    e: Vec<Vec3>,
    b: Vec<Vec3>,
    i0: i32,
    j0: i32,
    w: usize,
}

impl TileEb {
    fn load(e: &VecField, b: &VecField, tx: usize, ty: usize, t: usize) -> TileEb {
        let i0 = (tx * t) as i32 - 1;
        let j0 = (ty * t) as i32 - 1;
        let w = t + 2;
        let mut halo = TileEb {
            e: Vec::with_capacity(w * w),
            b: Vec::with_capacity(w * w),
            i0,
            j0,
            w,
        };
        for j in 0..w as i32 {
            for i in 0..w as i32 {
                halo.e.push(e.get((i0 + i) as isize, (j0 + j) as isize));
                halo.b.push(b.get((i0 + i) as isize, (j0 + j) as isize));
            }
        }
        halo
    }

    #[inline]
    fn idx(&self, i: i32, j: i32) -> usize {
        let di = (i - self.i0) as usize;
        let dj = (j - self.j0) as usize;
        debug_assert!(di < self.w && dj < self.w);
        dj * self.w + di
    }
}

impl EbSource for TileEb {
    #[inline]
    fn e(&self, i: i32, j: i32) -> Vec3 {
        self.e[self.idx(i, j)]
    }

    #[inline]
    fn b(&self, i: i32, j: i32) -> Vec3 {
        self.b[self.idx(i, j)]
    }
}

trait CurrentSink {
    fn add(&mut self, i: i32, j: i32, v: Vec3);
}

/// Tile-local `(T+3)²` current accumulator.
struct TileJ {
    data: Vec<Vec3>,
    i0: i32,
    j0: i32,
    w: usize,
}

impl TileJ {
    fn new(tx: usize, ty: usize, t: usize) -> TileJ {
        let w = t + 3;
        TileJ {
            data: vec![Vec3::zero(); w * w],
            i0: (tx * t) as i32 - 1,
            j0: (ty * t) as i32 - 1,
            w,
        }
    }

    fn scatter_into(&self, j: &mut VecField) {
        for dj in 0..self.w {
            for di in 0..self.w {
                let v = self.data[dj * self.w + di];
                if !v.is_zero() {
                    *j.at_mut((self.i0 + di as i32) as isize, (self.j0 + dj as i32) as isize) += v;
                }
            }
        }
    }
}

impl CurrentSink for TileJ {
    #[inline]
    fn add(&mut self, i: i32, j: i32, v: Vec3) {
        let di = (i - self.i0) as usize;
        let dj = (j - self.j0) as usize;
        debug_assert!(di < self.w && dj < self.w);
        self.data[dj * self.w + di] += v;
    }
}

/// `-1` if `v < 0`, `+1` if `v >= 1`, else `0`.
#[inline]
fn ltrim(v: Float) -> i32 {
    if v < 0. {
        -1
    } else if v >= 1. {
        1
    } else {
        0
    }
}

/// Linear field gather matching the Yee stagger: each component combines
/// the plain weights `(1-x, x)` with the half-cell shifted weights where
/// its stagger demands it.
fn interpolate<S: EbSource>(f: &S, ix: i32, jy: i32, x: Float, y: Float) -> (Vec3, Vec3) {
    let ih = if x < 0.5 { ix - 1 } else { ix };
    let jh = if y < 0.5 { jy - 1 } else { jy };
    let w1h = if x < 0.5 { x + 0.5 } else { x - 0.5 };
    let w2h = if y < 0.5 { y + 0.5 } else { y - 0.5 };

    let ep = Vec3::new(
        (f.e(ih, jy).x * (1. - w1h) + f.e(ih + 1, jy).x * w1h) * (1. - y)
            + (f.e(ih, jy + 1).x * (1. - w1h) + f.e(ih + 1, jy + 1).x * w1h) * y,
        (f.e(ix, jh).y * (1. - x) + f.e(ix + 1, jh).y * x) * (1. - w2h)
            + (f.e(ix, jh + 1).y * (1. - x) + f.e(ix + 1, jh + 1).y * x) * w2h,
        (f.e(ix, jy).z * (1. - x) + f.e(ix + 1, jy).z * x) * (1. - y)
            + (f.e(ix, jy + 1).z * (1. - x) + f.e(ix + 1, jy + 1).z * x) * y,
    );
    let bp = Vec3::new(
        (f.b(ix, jh).x * (1. - x) + f.b(ix + 1, jh).x * x) * (1. - w2h)
            + (f.b(ix, jh + 1).x * (1. - x) + f.b(ix + 1, jh + 1).x * x) * w2h,
        (f.b(ih, jy).y * (1. - w1h) + f.b(ih + 1, jy).y * w1h) * (1. - y)
            + (f.b(ih, jy + 1).y * (1. - w1h) + f.b(ih + 1, jy + 1).y * w1h) * y,
        (f.b(ih, jh).z * (1. - w1h) + f.b(ih + 1, jh).z * w1h) * (1. - w2h)
            + (f.b(ih, jh + 1).z * (1. - w1h) + f.b(ih + 1, jh + 1).z * w1h) * w2h,
    );
    (ep, bp)
}

/// Boris momentum update: half electric kick, magnetic rotation, half
/// electric kick.
fn boris(u: [Float; 3], ep: Vec3, bp: Vec3, tem: Float) -> [Float; 3] {
    let utx = u[0] + tem * ep.x;
    let uty = u[1] + tem * ep.y;
    let utz = u[2] + tem * ep.z;

    let gamma_t = (1. + utx * utx + uty * uty + utz * utz).sqrt();
    let tx = tem * bp.x / gamma_t;
    let ty = tem * bp.y / gamma_t;
    let tz = tem * bp.z / gamma_t;

    let upx = utx + uty * tz - utz * ty;
    let upy = uty + utz * tx - utx * tz;
    let upz = utz + utx * ty - uty * tx;

    let t2 = tx * tx + ty * ty + tz * tz;
    let sx = 2. * tx / (1. + t2);
    let sy = 2. * ty / (1. + t2);
    let sz = 2. * tz / (1. + t2);

    let ux = utx + upy * sz - upz * sy;
    let uy = uty + upz * sx - upx * sz;
    let uz = utz + upx * sy - upy * sx;

    [ux + tem * ep.x, uy + tem * ep.y, uz + tem * ep.z]
}

#[derive(Debug, Clone, Copy, Default)]
struct VirtualPart {
    ix: i32,
    iy: i32,
    x0: Float,
    y0: Float,
    x1: Float,
    y1: Float,
    qvz: Float,
}

/// Splits one trajectory at the cell crossings, x first, then y within the
/// resulting sub-segments. At most three segments, kept on the stack.
fn split_trajectory(
    ix: i32,
    iy: i32,
    x0: Float,
    y0: Float,
    dx: Float,
    dy: Float,
    di: i32,
    dj: i32,
    qvz: Float,
) -> ([VirtualPart; 3], usize) {
    let mut vp = [VirtualPart::default(); 3];
    let mut n = 1;
    vp[0] = VirtualPart {
        ix,
        iy,
        x0,
        y0,
        x1: x0 + dx,
        y1: y0 + dy,
        qvz,
    };

    if di != 0 {
        let xint = if di == 1 { 1. } else { 0. };
        let delta = (xint - x0) / dx;
        let yint = y0 + dy * delta;

        vp[1] = VirtualPart {
            ix: ix + di,
            iy,
            x0: xint - di as Float,
            y0: yint,
            x1: x0 + dx - di as Float,
            y1: y0 + dy,
            qvz: qvz * (1. - delta),
        };
        vp[0].x1 = xint;
        vp[0].y1 = yint;
        vp[0].qvz *= delta;
        n = 2;
    }

    if dj != 0 {
        let yint = if dj == 1 { 1. } else { 0. };
        // the segment that reaches across the y boundary
        let k = if vp[0].y1 < 0. || vp[0].y1 >= 1. { 0 } else { 1 };

        let s = vp[k];
        let delta = (yint - s.y0) / (s.y1 - s.y0);
        let xint = s.x0 + (s.x1 - s.x0) * delta;

        vp[n] = VirtualPart {
            ix: s.ix,
            iy: s.iy + dj,
            x0: xint,
            y0: yint - dj as Float,
            x1: s.x1,
            y1: s.y1 - dj as Float,
            qvz: s.qvz * (1. - delta),
        };
        vp[k].x1 = xint;
        vp[k].y1 = yint;
        vp[k].qvz *= delta;

        // the crossing happened before the x split: shift the later
        // segment into the new row frame
        if k == 0 && n == 2 {
            vp[1].y0 -= dj as Float;
            vp[1].y1 -= dj as Float;
            vp[1].iy += dj;
        }
        n += 1;
    }

    (vp, n)
}

fn deposit_vp<K: CurrentSink>(sink: &mut K, vp: &VirtualPart, qnx: Float, qny: Float) {
    let s0x = [1. - vp.x0, vp.x0];
    let s1x = [1. - vp.x1, vp.x1];
    let s0y = [1. - vp.y0, vp.y0];
    let s1y = [1. - vp.y1, vp.y1];

    let wl1 = qnx * (vp.x1 - vp.x0);
    let wl2 = qny * (vp.y1 - vp.y0);
    // time-averaged transverse shape
    let wp1 = [0.5 * (s0y[0] + s1y[0]), 0.5 * (s0y[1] + s1y[1])];
    let wp2 = [0.5 * (s0x[0] + s1x[0]), 0.5 * (s0x[1] + s1x[1])];

    // area swept by the segment, per corner
    let area = |a: usize, b: usize| {
        s0x[a] * s0y[b] + s1x[a] * s1y[b] + (s0x[a] * s1y[b] - s1x[a] * s0y[b]) / 2.
    };

    sink.add(
        vp.ix,
        vp.iy,
        Vec3::new(wl1 * wp1[0], wl2 * wp2[0], vp.qvz * area(0, 0)),
    );
    sink.add(
        vp.ix + 1,
        vp.iy,
        Vec3::new(0., wl2 * wp2[1], vp.qvz * area(1, 0)),
    );
    sink.add(
        vp.ix,
        vp.iy + 1,
        Vec3::new(wl1 * wp1[1], 0., vp.qvz * area(0, 1)),
    );
    sink.add(
        vp.ix + 1,
        vp.iy + 1,
        Vec3::new(0., 0., vp.qvz * area(1, 1)),
    );
}

/// Advances and deposits every valid particle of one tile.
fn push_tile<S: EbSource>(
    tile: &mut TileSliceMut,
    fields: &S,
    sink: &mut TileJ,
    p: &PushParams,
) -> Result<()> {
    for k in 0..tile.len() {
        if tile.invalid[k] {
            continue;
        }
        let ix = tile.ix[k];
        let jl = tile.iy[k] - p.y_lo;
        let x = tile.x[k];
        let y = tile.y[k];

        let (ep, bp) = interpolate(fields, ix, jl, x, y);
        let u = boris([tile.ux[k], tile.uy[k], tile.uz[k]], ep, bp, p.tem);

        let rg = 1. / (1. + u[0] * u[0] + u[1] * u[1] + u[2] * u[2]).sqrt();
        let dx = p.dt_dx * rg * u[0];
        let dy = p.dt_dy * rg * u[1];
        let x1 = x + dx;
        let y1 = y + dy;

        if x1 < -1. || x1 >= 2. || y1 < -1. || y1 >= 2. {
            bail!(ErrorKind::NumericOverrun(
                p.name.to_string(),
                x1.floor() as i32,
                y1.floor() as i32
            ));
        }
        let di = ltrim(x1);
        let dj = ltrim(y1);

        let qvz = 0.5 * p.q * u[2] * rg;
        let (vps, n) = split_trajectory(ix, jl, x, y, dx, dy, di, dj, qvz);
        for vp in &vps[..n] {
            deposit_vp(sink, vp, p.qnx, p.qny);
        }

        tile.x[k] = x1 - di as Float;
        tile.y[k] = y1 - dj as Float;
        tile.ix[k] = ix + di;
        tile.iy[k] += dj;
        tile.ux[k] = u[0];
        tile.uy[k] = u[1];
        tile.uz[k] = u[2];

        debug_assert!(tile.x[k] >= 0. && tile.x[k] < 1.);
        debug_assert!(tile.y[k] >= 0. && tile.y[k] < 1.);
    }
    Ok(())
}

/// CPU executor path: data-parallel over tiles against the global field
/// arrays.
pub fn advance_deposit(species: &mut Species, emf: &Emf, current: &mut Current) -> Result<()> {
    let tsize = species.tiles.size;
    let n_tx = species.tiles.n[0];
    let fields = GlobalEb {
        e: &emf.e,
        b: &emf.b,
    };

    let p = PushParams {
        name: &species.name,
        tem: 0.5 * species.dt / species.m_q,
        dt_dx: species.dt / species.layout.dx[0],
        dt_dy: species.dt / species.layout.dx[1],
        qnx: species.q * species.layout.dx[0] / species.dt,
        qny: species.q * species.layout.dx[1] / species.dt,
        q: species.q,
        y_lo: species.layout.off[1] as i32,
    };

    let mut slices = tile_slices(&mut species.store, &species.tiles.offset);
    let locals = slices
        .par_iter_mut()
        .map(|tile| {
            let (tx, ty) = (tile.tile % n_tx, tile.tile / n_tx);
            let mut local = TileJ::new(tx, ty, tsize);
            push_tile(tile, &fields, &mut local, &p)?;
            Ok(local)
        })
        .collect::<Result<Vec<TileJ>>>()?;

    for local in &locals {
        local.scatter_into(&mut current.j);
    }
    species.iter += 1;
    Ok(())
}

/// Accelerator queue path: tiles processed in order, each against its own
/// field halo copy.
pub fn advance_deposit_tiled(species: &mut Species, emf: &Emf, current: &mut Current) -> Result<()> {
    let tsize = species.tiles.size;
    let n_tx = species.tiles.n[0];

    let p = PushParams {
        name: &species.name,
        tem: 0.5 * species.dt / species.m_q,
        dt_dx: species.dt / species.layout.dx[0],
        dt_dy: species.dt / species.layout.dx[1],
        qnx: species.q * species.layout.dx[0] / species.dt,
        qny: species.q * species.layout.dx[1] / species.dt,
        q: species.q,
        y_lo: species.layout.off[1] as i32,
    };

    let mut slices = tile_slices(&mut species.store, &species.tiles.offset);
    for tile in &mut slices {
        let (tx, ty) = (tile.tile % n_tx, tile.tile / n_tx);
        let halo = TileEb::load(&emf.e, &emf.b, tx, ty, tsize);
        let mut local = TileJ::new(tx, ty, tsize);
        push_tile(tile, &halo, &mut local, &p)?;
        local.scatter_into(&mut current.j);
    }
    species.iter += 1;
    Ok(())
}
