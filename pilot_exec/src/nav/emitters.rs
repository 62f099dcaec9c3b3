//! # Emitter Grouping
//!
//! Individual light detections ("emitters") are not landmarks by themselves,
//! the arrangement is: two vertical lines form a square, a line pair plus a
//! lone emitter forms a sideways triangle, and a plain vertical line of N
//! lights is its own pattern. This module clusters raw emitter boxes into
//! those patterns and applies the barrel-distortion height correction.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One raw emitter detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub confidence: f64,
}

/// Grouping thresholds, per camera configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmitterParams {
    /// Two emitters share a vertical line when their horizontal centres are
    /// within this fraction of the view width.
    pub horizontal_leeway: f64,

    /// Two lines are vertically aligned when their centres differ by less
    /// than this fraction of the view height.
    pub vertical_leeway: f64,

    /// Maximum ratio between the heights of a pair's two lines.
    pub similar_height_ratio: f64,

    /// Bounds on a pair's horizontal separation relative to its mean line
    /// height.
    pub min_separation_ratio: f64,
    pub max_separation_ratio: f64,

    /// Minimum emitters for a standalone vertical line pattern.
    pub min_vert_lights: usize,

    /// Fractional apparent-size inflation at the edge of the view.
    pub barrel_distortion_at_edge: f64,
}

/// A detected pattern with its combined bounding box.
#[derive(Debug, Clone)]
pub struct EmitterGroup {
    pub pattern: EmitterPattern,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub confidence: f64,

    /// Barrel-distortion-corrected visible height, pixels.
    pub corrected_height: f64,
}

/// Emitters clustered by horizontal centre.
#[derive(Debug, Clone)]
struct VerticalLine {
    emitters: Vec<EmitterBox>,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterPattern {
    Square,
    SidewaysTriangleLeft,
    SidewaysTriangleRight,
    Line(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for EmitterParams {
    fn default() -> Self {
        Self {
            horizontal_leeway: 0.02,
            vertical_leeway: 0.08,
            similar_height_ratio: 1.3,
            min_separation_ratio: 0.3,
            max_separation_ratio: 2.5,
            min_vert_lights: 2,
            barrel_distortion_at_edge: 0.1,
        }
    }
}

impl EmitterPattern {
    /// The pattern discriminator used in map landmark lookups.
    pub fn code(&self) -> String {
        match self {
            EmitterPattern::Square => "square".to_string(),
            EmitterPattern::SidewaysTriangleLeft => "sideways_triangle_left".to_string(),
            EmitterPattern::SidewaysTriangleRight => "sideways_triangle_right".to_string(),
            EmitterPattern::Line(n) => n.to_string(),
        }
    }
}

impl VerticalLine {
    fn center_x(&self) -> f64 {
        let sum: f64 = self.emitters.iter().map(|e| (e.x1 + e.x2) / 2.0).sum();
        sum / self.emitters.len() as f64
    }

    fn top(&self) -> f64 {
        self.emitters.iter().map(|e| e.y1).fold(f64::MAX, f64::min)
    }

    fn bottom(&self) -> f64 {
        self.emitters.iter().map(|e| e.y2).fold(f64::MIN, f64::max)
    }

    fn center_y(&self) -> f64 {
        (self.top() + self.bottom()) / 2.0
    }

    fn height(&self) -> f64 {
        self.bottom() - self.top()
    }

    fn left(&self) -> f64 {
        self.emitters.iter().map(|e| e.x1).fold(f64::MAX, f64::min)
    }

    fn right(&self) -> f64 {
        self.emitters.iter().map(|e| e.x2).fold(f64::MIN, f64::max)
    }

    fn confidence(&self) -> f64 {
        let sum: f64 = self.emitters.iter().map(|e| e.confidence).sum();
        sum / self.emitters.len() as f64
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Cluster raw emitter boxes and detect every pattern present in the frame.
pub fn find_groups(
    emitters: &[EmitterBox],
    params: &EmitterParams,
    view_w: f64,
    view_h: f64,
) -> Vec<EmitterGroup> {
    let mut lines = cluster_vertical_lines(emitters, params.horizontal_leeway * view_w);
    let mut groups = Vec::new();

    // Pairs first: each pair is a square unless a lone emitter beside it
    // upgrades it to a sideways triangle
    loop {
        let pair = find_pair(&lines, params, view_h);
        let (i, j) = match pair {
            Some(p) => p,
            None => break,
        };

        // i is the left line of the pair
        let lone = find_lone_beside(&lines, i, j, params, view_h);

        match lone {
            Some((k, left_side)) => {
                let pattern = if left_side {
                    EmitterPattern::SidewaysTriangleLeft
                } else {
                    EmitterPattern::SidewaysTriangleRight
                };
                let members = [&lines[i], &lines[j], &lines[k]];
                groups.push(build_group(&members, pattern, params, view_w));

                let mut remove = vec![i, j, k];
                remove.sort_unstable_by(|a, b| b.cmp(a));
                for idx in remove {
                    lines.remove(idx);
                }
            }
            None => {
                let members = [&lines[i], &lines[j]];
                groups.push(build_group(&members, EmitterPattern::Square, params, view_w));

                // j > i always
                lines.remove(j);
                lines.remove(i);
            }
        }
    }

    // Remaining vertical lines of enough emitters stand on their own
    for line in &lines {
        if line.emitters.len() >= params.min_vert_lights {
            groups.push(build_group(
                &[line],
                EmitterPattern::Line(line.emitters.len()),
                params,
                view_w,
            ));
        }
    }

    groups
}

/// The barrel distortion factor at a horizontal position: zero at the view
/// centre, `barrel_distortion_at_edge` at either edge, linear between.
pub fn distortion_at(center_x: f64, view_w: f64, at_edge: f64) -> f64 {
    let view_cx = view_w / 2.0;
    (center_x - view_cx).abs() / view_cx * at_edge
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Greedy clustering of emitters into vertical lines by horizontal centre.
fn cluster_vertical_lines(emitters: &[EmitterBox], leeway_px: f64) -> Vec<VerticalLine> {
    let mut sorted: Vec<EmitterBox> = emitters.to_vec();
    sorted.sort_by(|a, b| {
        ((a.x1 + a.x2) / 2.0)
            .partial_cmp(&((b.x1 + b.x2) / 2.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut lines: Vec<VerticalLine> = Vec::new();
    for emitter in sorted {
        let cx = (emitter.x1 + emitter.x2) / 2.0;
        match lines
            .iter_mut()
            .find(|line| (line.center_x() - cx).abs() <= leeway_px)
        {
            Some(line) => line.emitters.push(emitter),
            None => lines.push(VerticalLine {
                emitters: vec![emitter],
            }),
        }
    }

    lines
}

/// The first pair of multi-emitter lines which could form a square: similar
/// heights, vertically aligned, separation within bounds. Returns indices
/// with the left line first.
fn find_pair(lines: &[VerticalLine], params: &EmitterParams, view_h: f64) -> Option<(usize, usize)> {
    for i in 0..lines.len() {
        if lines[i].emitters.len() < 2 {
            continue;
        }
        for j in (i + 1)..lines.len() {
            if lines[j].emitters.len() < 2 {
                continue;
            }

            let (a, b) = (&lines[i], &lines[j]);

            let heights_similar = {
                let (hi, lo) = if a.height() >= b.height() {
                    (a.height(), b.height())
                } else {
                    (b.height(), a.height())
                };
                lo > 0.0 && hi / lo <= params.similar_height_ratio
            };

            let aligned = (a.center_y() - b.center_y()).abs() <= params.vertical_leeway * view_h;

            let mean_height = (a.height() + b.height()) / 2.0;
            let separation = (a.center_x() - b.center_x()).abs();
            let separated = mean_height > 0.0
                && separation / mean_height >= params.min_separation_ratio
                && separation / mean_height <= params.max_separation_ratio;

            if heights_similar && aligned && separated {
                return if a.center_x() <= b.center_x() {
                    Some((i, j))
                } else {
                    Some((j, i))
                };
            }
        }
    }
    None
}

/// A single-emitter line beside the pair `(left, right)` at roughly the
/// pair's vertical centre, forming the point of a sideways triangle.
/// Returns the line index and whether it sits on the left.
fn find_lone_beside(
    lines: &[VerticalLine],
    left: usize,
    right: usize,
    params: &EmitterParams,
    view_h: f64,
) -> Option<(usize, bool)> {
    let pair_cy = (lines[left].center_y() + lines[right].center_y()) / 2.0;
    let mean_height = (lines[left].height() + lines[right].height()) / 2.0;
    let max_reach = mean_height * params.max_separation_ratio;

    for (k, line) in lines.iter().enumerate() {
        if k == left || k == right || line.emitters.len() != 1 {
            continue;
        }
        if (line.center_y() - pair_cy).abs() > params.vertical_leeway * view_h {
            continue;
        }

        let cx = line.center_x();
        if cx < lines[left].center_x() && lines[left].center_x() - cx <= max_reach {
            return Some((k, true));
        }
        if cx > lines[right].center_x() && cx - lines[right].center_x() <= max_reach {
            return Some((k, false));
        }
    }

    None
}

fn build_group(
    members: &[&VerticalLine],
    pattern: EmitterPattern,
    params: &EmitterParams,
    view_w: f64,
) -> EmitterGroup {
    let x1 = members.iter().map(|l| l.left()).fold(f64::MAX, f64::min);
    let x2 = members.iter().map(|l| l.right()).fold(f64::MIN, f64::max);
    let y1 = members.iter().map(|l| l.top()).fold(f64::MAX, f64::min);
    let y2 = members.iter().map(|l| l.bottom()).fold(f64::MIN, f64::max);

    let confidence =
        members.iter().map(|l| l.confidence()).sum::<f64>() / members.len() as f64;

    let center_x = (x1 + x2) / 2.0;
    let distortion = distortion_at(center_x, view_w, params.barrel_distortion_at_edge);

    EmitterGroup {
        pattern,
        x1,
        y1,
        x2,
        y2,
        confidence,
        // Barrel distortion shrinks apparent size toward the edges, so the
        // correction inflates
        corrected_height: (y2 - y1) * (1.0 + distortion),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const VIEW_W: f64 = 1280.0;
    const VIEW_H: f64 = 720.0;

    fn emitter(cx: f64, cy: f64) -> EmitterBox {
        EmitterBox {
            x1: cx - 5.0,
            y1: cy - 5.0,
            x2: cx + 5.0,
            y2: cy + 5.0,
            confidence: 0.9,
        }
    }

    /// Vertical line of emitters at `cx`, spanning `top..bottom`.
    fn line(cx: f64, top: f64, bottom: f64, count: usize) -> Vec<EmitterBox> {
        (0..count)
            .map(|i| {
                let t = i as f64 / (count - 1) as f64;
                emitter(cx, top + t * (bottom - top))
            })
            .collect()
    }

    #[test]
    fn test_vertical_clustering() {
        let mut emitters = line(300.0, 200.0, 300.0, 3);
        emitters.extend(line(600.0, 200.0, 300.0, 3));

        let lines = cluster_vertical_lines(&emitters, 0.02 * VIEW_W);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].emitters.len(), 3);
    }

    #[test]
    fn test_square_detection() {
        let mut emitters = line(300.0, 200.0, 300.0, 3);
        emitters.extend(line(380.0, 200.0, 300.0, 3));

        let groups = find_groups(&emitters, &EmitterParams::default(), VIEW_W, VIEW_H);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].pattern, EmitterPattern::Square);
        assert_eq!(groups[0].pattern.code(), "square");
    }

    #[test]
    fn test_triangle_detection_left_and_right() {
        // Pair at 300/380 with the lone emitter on the left
        let mut emitters = line(300.0, 200.0, 300.0, 3);
        emitters.extend(line(380.0, 200.0, 300.0, 3));
        emitters.push(emitter(220.0, 250.0));

        let groups = find_groups(&emitters, &EmitterParams::default(), VIEW_W, VIEW_H);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].pattern, EmitterPattern::SidewaysTriangleLeft);

        // Lone emitter on the right instead
        let mut emitters = line(300.0, 200.0, 300.0, 3);
        emitters.extend(line(380.0, 200.0, 300.0, 3));
        emitters.push(emitter(460.0, 250.0));

        let groups = find_groups(&emitters, &EmitterParams::default(), VIEW_W, VIEW_H);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].pattern, EmitterPattern::SidewaysTriangleRight);
        assert_eq!(groups[0].pattern.code(), "sideways_triangle_right");
    }

    #[test]
    fn test_standalone_line() {
        let emitters = line(640.0, 100.0, 400.0, 4);
        let groups = find_groups(&emitters, &EmitterParams::default(), VIEW_W, VIEW_H);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].pattern, EmitterPattern::Line(4));
        assert_eq!(groups[0].pattern.code(), "4");
    }

    #[test]
    fn test_misaligned_pair_is_not_square() {
        // Same shapes but one line much lower
        let mut emitters = line(300.0, 200.0, 300.0, 3);
        emitters.extend(line(380.0, 500.0, 600.0, 3));

        let groups = find_groups(&emitters, &EmitterParams::default(), VIEW_W, VIEW_H);
        assert!(groups.iter().all(|g| g.pattern != EmitterPattern::Square));
    }

    #[test]
    fn test_distortion_correction() {
        // At the view centre no correction
        assert_eq!(distortion_at(640.0, VIEW_W, 0.1), 0.0);

        // At the edge the full factor
        assert!((distortion_at(0.0, VIEW_W, 0.1) - 0.1).abs() < 1e-12);

        // A group off-centre reports a corrected height larger than raw
        let emitters = line(100.0, 100.0, 400.0, 4);
        let groups = find_groups(&emitters, &EmitterParams::default(), VIEW_W, VIEW_H);
        assert_eq!(groups.len(), 1);
        let raw = groups[0].y2 - groups[0].y1;
        assert!(groups[0].corrected_height > raw);
    }
}
