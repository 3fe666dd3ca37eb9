//! Highest posterior density regions for bivariate traits.
//!
//! Sampled coordinate pairs are smoothed with a Gaussian product-kernel
//! density estimate on a regular grid, the density level enclosing the
//! requested probability mass is located on the sorted grid masses, and the
//! level curves are traced with marching squares. A region may come back as
//! more than one closed loop when the density is multimodal.

use std::collections::{HashMap, VecDeque};

use rayon::prelude::*;

use crate::stats;

/// Grid resolution per axis of the density estimate.
const GRID: usize = 50;

/// Grid margin around the data range, in bandwidths. Wide enough that the
/// density is effectively zero at the boundary and contour loops close.
const CUT: f64 = 3.0;

/// One traced level curve. Vertices are in grid order; the loop is closed
/// (last vertex connects back to the first).
#[derive(Clone, Debug)]
pub struct ContourPath {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

/// Normal-reference bandwidth for one coordinate of the sample.
fn nrd_bandwidth(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let quartile = |q: f64| sorted[((sorted.len() - 1) as f64 * q).round() as usize];
    let iqr = quartile(0.75) - quartile(0.25);

    let m = stats::mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (n - 1.0).max(1.0);
    let sd = var.sqrt();

    let spread = if iqr > 0.0 {
        sd.min(iqr / 1.34)
    } else {
        sd
    };
    let h = 1.06 * spread * n.powf(-0.2);
    if h > 0.0 { h } else { 1.0 }
}

fn gauss(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

struct DensityGrid {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// `density[i][j]` at `(xs[i], ys[j])`.
    density: Vec<Vec<f64>>,
    cell_area: f64,
}

fn estimate_density(x: &[f64], y: &[f64]) -> DensityGrid {
    let hx = nrd_bandwidth(x);
    let hy = nrd_bandwidth(y);

    let (x_min, x_max) = stats::min_max(x);
    let (y_min, y_max) = stats::min_max(y);
    let x_lo = x_min - CUT * hx;
    let x_hi = x_max + CUT * hx;
    let y_lo = y_min - CUT * hy;
    let y_hi = y_max + CUT * hy;

    let step = |lo: f64, hi: f64, i: usize| lo + (hi - lo) * i as f64 / (GRID - 1) as f64;
    let xs: Vec<f64> = (0..GRID).map(|i| step(x_lo, x_hi, i)).collect();
    let ys: Vec<f64> = (0..GRID).map(|j| step(y_lo, y_hi, j)).collect();

    let n = x.len() as f64;
    let density: Vec<Vec<f64>> = xs
        .par_iter()
        .map(|&gx| {
            ys.iter()
                .map(|&gy| {
                    let mut sum = 0.0;
                    for (&xi, &yi) in x.iter().zip(y) {
                        sum += gauss((gx - xi) / hx) * gauss((gy - yi) / hy);
                    }
                    sum / (n * hx * hy)
                })
                .collect()
        })
        .collect();

    let cell_area = (xs[1] - xs[0]) * (ys[1] - ys[0]);
    DensityGrid {
        xs,
        ys,
        density,
        cell_area,
    }
}

/// Density level whose superlevel set encloses `mass` of the estimated
/// distribution, found by linear interpolation on the sorted grid masses.
fn mass_level(grid: &DensityGrid, mass: f64) -> f64 {
    let mut sorted: Vec<f64> = grid.density.iter().flatten().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let total: f64 = sorted.iter().sum::<f64>() * grid.cell_area;
    let target = (1.0 - mass) * total;

    let mut cumulative = 0.0;
    for (k, &level) in sorted.iter().enumerate() {
        let next = cumulative + level * grid.cell_area;
        if next >= target {
            if k == 0 {
                return level;
            }
            let previous = sorted[k - 1];
            let t = (target - cumulative) / (next - cumulative).max(f64::MIN_POSITIVE);
            return previous + t * (level - previous);
        }
        cumulative = next;
    }
    sorted.last().copied().unwrap_or(0.0)
}

type Point = (f64, f64);
type Segment = (Point, Point);

/// Interpolates the level crossing between two grid corners. Corners must be
/// passed in ascending grid order so that both cells sharing an edge compute
/// bit-identical crossing points.
fn crossing(p1: (f64, f64), v1: f64, p2: (f64, f64), v2: f64, level: f64) -> Point {
    let t = ((level - v1) / (v2 - v1)).clamp(0.0, 1.0);
    (p1.0 + t * (p2.0 - p1.0), p1.1 + t * (p2.1 - p1.1))
}

/// Traces all level curves of the grid at `level` with marching squares.
fn trace_level(grid: &DensityGrid, level: f64) -> Vec<ContourPath> {
    let d = &grid.density;
    let mut segments: Vec<Segment> = Vec::new();

    for i in 0..GRID - 1 {
        for j in 0..GRID - 1 {
            let (x0, x1) = (grid.xs[i], grid.xs[i + 1]);
            let (y0, y1) = (grid.ys[j], grid.ys[j + 1]);
            let a = d[i][j]; // bottom-left
            let b = d[i + 1][j]; // bottom-right
            let c = d[i + 1][j + 1]; // top-right
            let e = d[i][j + 1]; // top-left

            let mut case = 0u8;
            if a > level {
                case |= 1;
            }
            if b > level {
                case |= 2;
            }
            if c > level {
                case |= 4;
            }
            if e > level {
                case |= 8;
            }
            if case == 0 || case == 15 {
                continue;
            }

            // Edge crossings, each computed from corners in grid order.
            let south = || crossing((x0, y0), a, (x1, y0), b, level);
            let east = || crossing((x1, y0), b, (x1, y1), c, level);
            let north = || crossing((x0, y1), e, (x1, y1), c, level);
            let west = || crossing((x0, y0), a, (x0, y1), e, level);

            match case {
                1 | 14 => segments.push((west(), south())),
                2 | 13 => segments.push((south(), east())),
                3 | 12 => segments.push((west(), east())),
                4 | 11 => segments.push((east(), north())),
                6 | 9 => segments.push((south(), north())),
                7 | 8 => segments.push((west(), north())),
                5 | 10 => {
                    // Saddle cell: resolve with the center density.
                    let center_above = (a + b + c + e) / 4.0 > level;
                    let joined = (case == 5) == center_above;
                    if joined {
                        segments.push((west(), north()));
                        segments.push((south(), east()));
                    } else {
                        segments.push((west(), south()));
                        segments.push((east(), north()));
                    }
                }
                _ => unreachable!(),
            }
        }
    }

    stitch_segments(segments)
}

/// Links matching segment endpoints into paths.
fn stitch_segments(segments: Vec<Segment>) -> Vec<ContourPath> {
    let key = |p: Point| (p.0.to_bits(), p.1.to_bits());

    let mut adjacency: HashMap<(u64, u64), Vec<usize>> = HashMap::new();
    for (s, &(p, q)) in segments.iter().enumerate() {
        adjacency.entry(key(p)).or_default().push(s);
        adjacency.entry(key(q)).or_default().push(s);
    }

    let mut used = vec![false; segments.len()];
    let mut paths = Vec::new();

    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (p, q) = segments[start];
        let mut path: VecDeque<Point> = VecDeque::from([p, q]);
        let mut head = p;
        let mut tail = q;

        // Grow forward from the tail, then backward from the head in case
        // the path is open (clipped at the grid boundary).
        for forward in [true, false] {
            loop {
                let end = if forward { tail } else { head };
                let Some(&next) = adjacency
                    .get(&key(end))
                    .and_then(|ids| ids.iter().find(|&&s| !used[s]))
                else {
                    break;
                };
                used[next] = true;
                let (a, b) = segments[next];
                let point = if key(a) == key(end) { b } else { a };
                if (forward && key(point) == key(head)) || (!forward && key(point) == key(tail)) {
                    break; // loop closed
                }
                if forward {
                    path.push_back(point);
                    tail = point;
                } else {
                    path.push_front(point);
                    head = point;
                }
            }
        }

        let (xs, ys) = path.into_iter().unzip();
        paths.push(ContourPath { xs, ys });
    }
    paths
}

/// The HPD region of a bivariate sample at probability `mass`, as one or more
/// closed loops. More than one loop means the region is disjoint.
pub fn hpd_contours(x: &[f64], y: &[f64], mass: f64) -> Vec<ContourPath> {
    let grid = estimate_density(x, y);
    let level = mass_level(&grid, mass);
    trace_level(&grid, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(cx: f64, cy: f64) -> (Vec<f64>, Vec<f64>) {
        // Deterministic jittered cloud around (cx, cy)
        let offsets = [
            -0.9, -0.7, -0.5, -0.3, -0.1, 0.1, 0.3, 0.5, 0.7, 0.9, -0.6, -0.2, 0.2, 0.6, 0.0,
        ];
        let xs: Vec<f64> = offsets.iter().map(|o| cx + o).collect();
        let ys: Vec<f64> = offsets.iter().rev().map(|o| cy + o * 0.8).collect();
        (xs, ys)
    }

    #[test]
    fn test_unimodal_sample_gives_one_loop() {
        let (xs, ys) = cluster(0.0, 0.0);
        let paths = hpd_contours(&xs, &ys, 0.8);
        assert_eq!(paths.len(), 1);
        assert!(paths[0].xs.len() >= 4);
    }

    #[test]
    fn test_separated_modes_give_disjoint_region() {
        let (mut xs, mut ys) = cluster(0.0, 0.0);
        let (xs2, ys2) = cluster(100.0, 100.0);
        xs.extend(xs2);
        ys.extend(ys2);
        let paths = hpd_contours(&xs, &ys, 0.8);
        assert!(paths.len() >= 2);
    }

    #[test]
    fn test_higher_mass_needs_lower_level() {
        let (xs, ys) = cluster(0.0, 0.0);
        let grid = estimate_density(&xs, &ys);
        let wide = mass_level(&grid, 0.95);
        let narrow = mass_level(&grid, 0.5);
        assert!(wide < narrow);
    }

    #[test]
    fn test_contour_encloses_the_data_mode() {
        let (xs, ys) = cluster(2.0, -1.0);
        let paths = hpd_contours(&xs, &ys, 0.8);
        let path = &paths[0];
        let (lo, hi) = stats::min_max(&path.xs);
        assert!(lo < 2.0 && hi > 2.0);
        let (lo_y, hi_y) = stats::min_max(&path.ys);
        assert!(lo_y < -1.0 && hi_y > -1.0);
    }
}
