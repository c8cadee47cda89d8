use super::TransformParams;
use crate::names::ClassNames;
use ndarray::{ArrayView1, ArrayView2, ArrayViewD, Axis, Ix2};
use serde::Serialize;

/// Number of values per row in the end-to-end layout: x1, y1, x2, y2, score, class.
const END_TO_END_ROW: usize = 6;

/// One detected object in original-image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub conf: f32,
    pub cls: u32,
    pub name: String,
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > f32::EPSILON { inter / union } else { 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputLayout {
    /// `[1, 4 + nc, anchors]`, needs NMS
    ChannelsFirst,
    /// `[1, anchors, 4 + nc]`, needs NMS
    ChannelsLast,
    /// `[1, max_det, 6]`, already suppressed by the graph
    EndToEnd,
}

impl OutputLayout {
    /// `num_classes` comes from the model metadata, 0 when unknown. A two-class
    /// channels-last output is also 6 wide, so it is only read as end-to-end
    /// when the class count rules that out.
    fn detect(shape: &[usize], num_classes: usize) -> anyhow::Result<Self> {
        if shape.len() != 3 || shape[0] != 1 {
            anyhow::bail!(
                "Unexpected model output shape {:?}, expected [1, features, anchors]",
                shape
            );
        }
        let (a, b) = (shape[1], shape[2]);
        // No anchors at all: pick the orientation that yields zero rows
        if a == 0 || b == 0 {
            return Ok(if b == 0 {
                OutputLayout::ChannelsFirst
            } else {
                OutputLayout::ChannelsLast
            });
        }
        if b == END_TO_END_ROW && a != END_TO_END_ROW && num_classes + 4 != END_TO_END_ROW {
            return Ok(OutputLayout::EndToEnd);
        }
        let features = a.min(b);
        if features < 5 {
            anyhow::bail!(
                "Model output has {} features per anchor, expected 4 box values plus class scores",
                features
            );
        }
        if a <= b {
            Ok(OutputLayout::ChannelsFirst)
        } else {
            Ok(OutputLayout::ChannelsLast)
        }
    }
}

pub struct PostProcessor {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl PostProcessor {
    pub fn new(confidence_threshold: f32, iou_threshold: f32, max_detections: usize) -> Self {
        Self {
            confidence_threshold,
            iou_threshold,
            max_detections,
        }
    }

    /// Turn raw model output into detections on the original image, sorted by
    /// confidence (highest first).
    #[tracing::instrument(skip_all, fields(shape = ?predictions.shape()))]
    pub fn parse_detections(
        &self,
        predictions: &ArrayViewD<f32>,
        transform: &TransformParams,
        names: &ClassNames,
    ) -> anyhow::Result<Vec<Detection>> {
        let layout = OutputLayout::detect(predictions.shape(), names.len())?;
        let rows: ArrayView2<f32> = predictions
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()?;

        let detections = match layout {
            OutputLayout::ChannelsFirst => {
                let candidates = self.decode_anchors(rows.reversed_axes(), transform, names);
                self.non_max_suppression(candidates)
            }
            OutputLayout::ChannelsLast => {
                let candidates = self.decode_anchors(rows, transform, names);
                self.non_max_suppression(candidates)
            }
            OutputLayout::EndToEnd => {
                let mut detections = self.decode_end_to_end(rows, transform, names);
                sort_by_confidence(&mut detections);
                detections.truncate(self.max_detections);
                detections
            }
        };

        tracing::debug!(count = detections.len(), layout = ?layout, "Parsed detections");
        Ok(detections)
    }

    /// Rows are anchors: `cx, cy, w, h, score_0 .. score_nc` in model-input pixels.
    fn decode_anchors(
        &self,
        rows: ArrayView2<f32>,
        transform: &TransformParams,
        names: &ClassNames,
    ) -> Vec<Detection> {
        let mut candidates = Vec::new();

        for row in rows.rows() {
            let Some((class_id, confidence)) = argmax(row.slice(ndarray::s![4..])) else {
                continue;
            };
            if !confidence.is_finite() || confidence < self.confidence_threshold {
                continue;
            }

            let (x1, y1, x2, y2) = cxcywh_to_xyxy(row[0], row[1], row[2], row[3]);
            if let Some(detection) =
                to_original(x1, y1, x2, y2, confidence, class_id, transform, names)
            {
                candidates.push(detection);
            }
        }

        candidates
    }

    fn decode_end_to_end(
        &self,
        rows: ArrayView2<f32>,
        transform: &TransformParams,
        names: &ClassNames,
    ) -> Vec<Detection> {
        rows.rows()
            .into_iter()
            .filter_map(|row| {
                let confidence = row[4];
                if !confidence.is_finite() || confidence < self.confidence_threshold {
                    return None;
                }
                let class = row[5];
                if !class.is_finite() || class < 0.0 {
                    return None;
                }
                to_original(
                    row[0],
                    row[1],
                    row[2],
                    row[3],
                    confidence,
                    class.round() as u32,
                    transform,
                    names,
                )
            })
            .collect()
    }

    /// Greedy per-class suppression. Keeps at most `max_detections` boxes.
    fn non_max_suppression(&self, mut candidates: Vec<Detection>) -> Vec<Detection> {
        sort_by_confidence(&mut candidates);

        let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len().min(self.max_detections));
        for candidate in candidates {
            if kept.len() >= self.max_detections {
                break;
            }
            let suppressed = kept.iter().any(|k| {
                k.cls == candidate.cls && k.iou(&candidate) > self.iou_threshold
            });
            if !suppressed {
                kept.push(candidate);
            }
        }
        kept
    }
}

fn sort_by_confidence(detections: &mut [Detection]) {
    detections.sort_by(|a, b| b.conf.total_cmp(&a.conf));
}

/// Index and value of the highest score. `None` for an empty slice.
#[inline]
fn argmax(scores: ArrayView1<f32>) -> Option<(u32, f32)> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best, (idx, &score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((idx as u32, score)),
        })
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;
    (x1, y1, x2, y2)
}

/// Undo the letterbox and clamp to the image. Degenerate boxes yield `None`.
#[allow(clippy::too_many_arguments)]
fn to_original(
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
    class_id: u32,
    transform: &TransformParams,
    names: &ClassNames,
) -> Option<Detection> {
    if transform.scale <= f32::EPSILON {
        return None;
    }
    let width = transform.orig_width as f32;
    let height = transform.orig_height as f32;

    let x1 = ((x1 - transform.offset_x) / transform.scale).clamp(0.0, width);
    let y1 = ((y1 - transform.offset_y) / transform.scale).clamp(0.0, height);
    let x2 = ((x2 - transform.offset_x) / transform.scale).clamp(0.0, width);
    let y2 = ((y2 - transform.offset_y) / transform.scale).clamp(0.0, height);

    // NaN fails both comparisons
    if !(x2 > x1 && y2 > y1) {
        return None;
    }

    Some(Detection {
        x1,
        y1,
        x2,
        y2,
        conf: confidence,
        cls: class_id,
        name: names.name(class_id),
    })
}
