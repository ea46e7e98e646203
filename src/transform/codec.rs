//! JSON boundary for transforms.
//!
//! The service describes every transform with a `type` discriminator
//! (`leaf`, `ref`, `interpolated`, `list`). Leaves additionally carry the
//! Java `className` and a whitespace separated `dataString`. Decoding goes
//! through a fixed registry of class names; anything unknown is rejected.

use crate::error::{TransformError, TransformResult};
use crate::geometry::Point;
use crate::transform::polynomial::checked_coefficient_count;
use crate::transform::{
    AffineModel, InterpolatedTransform, LeafModel, LeafTransform, NonLinearClass, NonLinearModel,
    OpaqueModel, Polynomial2D, ReferenceTransform, RigidModel, SimilarityModel, ThinPlateSpline,
    Transform, TransformList, TranslationModel,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const AFFINE_CLASS: &str = "mpicbg.trakem2.transform.AffineModel2D";
pub const TRANSLATION_CLASS: &str = "mpicbg.trakem2.transform.TranslationModel2D";
pub const RIGID_CLASS: &str = "mpicbg.trakem2.transform.RigidModel2D";
pub const SIMILARITY_CLASS: &str = "mpicbg.trakem2.transform.SimilarityModel2D";
pub const POLYNOMIAL_CLASS: &str = "mpicbg.trakem2.transform.PolynomialTransform2D";
pub const NON_LINEAR_COORDINATE_CLASS: &str = "mpicbg.trakem2.transform.NonLinearCoordinateTransform";
pub const NON_LINEAR_CLASS: &str = "mpicbg.trakem2.transform.nonLinearTransform";
pub const LENS_CORRECTION_CLASS: &str = "lenscorrection.NonLinearTransform";
pub const THIN_PLATE_SPLINE_CLASS: &str = "mpicbg.trakem2.transform.ThinPlateSplineTransform";

const LEAF_TYPE: &str = "leaf";
const REF_TYPE: &str = "ref";
const INTERPOLATED_TYPE: &str = "interpolated";
const LIST_TYPE: &str = "list";

/// First field of a thin-plate spline dataString.
const TPS_KERNEL: &str = "ThinPlateSplineR2LogR";
/// Marks an absent affine block in a thin-plate spline dataString.
const TPS_NO_AFFINE: &str = "null";

/// Loosely typed wire form shared by every transform kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransform {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<RawMetaData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<Box<RawTransform>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<Box<RawTransform>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lambda: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_list: Option<Vec<RawTransform>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMetaData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

fn required<T>(value: Option<T>, field: &str, kind: &str) -> TransformResult<T> {
    value.ok_or_else(|| TransformError::malformed(format!("{kind} transform is missing '{field}'")))
}

impl TryFrom<RawTransform> for Transform {
    type Error = TransformError;

    fn try_from(raw: RawTransform) -> TransformResult<Self> {
        match raw.kind.as_deref().unwrap_or(LEAF_TYPE) {
            LEAF_TYPE => {
                let class_name = required(raw.class_name, "className", LEAF_TYPE)?;
                let data_string = required(raw.data_string, "dataString", LEAF_TYPE)?;
                Ok(Transform::Leaf(LeafTransform {
                    model: decode_leaf(&class_name, &data_string)?,
                    id: raw.id,
                    labels: raw.meta_data.and_then(|m| m.labels),
                }))
            }
            REF_TYPE => Ok(Transform::Reference(ReferenceTransform {
                ref_id: required(raw.ref_id, "refId", REF_TYPE)?,
                id: raw.id,
            })),
            INTERPOLATED_TYPE => {
                let a = required(raw.a, "a", INTERPOLATED_TYPE)?;
                let b = required(raw.b, "b", INTERPOLATED_TYPE)?;
                let lambda = required(raw.lambda, "lambda", INTERPOLATED_TYPE)?;
                let mut interpolated =
                    InterpolatedTransform::new(Transform::try_from(*a)?, Transform::try_from(*b)?, lambda);
                interpolated.id = raw.id;
                Ok(Transform::Interpolated(interpolated))
            }
            LIST_TYPE => Ok(Transform::List(TransformList::try_from(raw)?)),
            other => Err(TransformError::malformed(format!(
                "unknown transform type '{other}'"
            ))),
        }
    }
}

impl From<Transform> for RawTransform {
    fn from(transform: Transform) -> Self {
        match transform {
            Transform::Leaf(leaf) => {
                let (class_name, data_string) = encode_leaf(&leaf.model);
                RawTransform {
                    kind: Some(LEAF_TYPE.to_string()),
                    class_name: Some(class_name),
                    data_string: Some(data_string),
                    id: leaf.id,
                    meta_data: leaf.labels.map(|labels| RawMetaData {
                        labels: Some(labels),
                    }),
                    ..Default::default()
                }
            }
            Transform::Reference(r) => RawTransform {
                kind: Some(REF_TYPE.to_string()),
                ref_id: Some(r.ref_id),
                id: r.id,
                ..Default::default()
            },
            Transform::Interpolated(i) => RawTransform {
                kind: Some(INTERPOLATED_TYPE.to_string()),
                a: Some(Box::new(RawTransform::from(*i.a))),
                b: Some(Box::new(RawTransform::from(*i.b))),
                lambda: Some(i.lambda),
                id: i.id,
                ..Default::default()
            },
            Transform::List(list) => list.into(),
        }
    }
}

impl TryFrom<RawTransform> for TransformList {
    type Error = TransformError;

    fn try_from(raw: RawTransform) -> TransformResult<Self> {
        match raw.kind.as_deref() {
            Some(LIST_TYPE) | None => {}
            Some(other) => {
                return Err(TransformError::malformed(format!(
                    "expected a list transform, found type '{other}'"
                )))
            }
        }
        let specs = required(raw.spec_list, "specList", LIST_TYPE)?;
        let transforms = specs
            .into_iter()
            .enumerate()
            .map(|(k, spec)| Transform::try_from(spec).map_err(|e| e.at_index(k)))
            .collect::<TransformResult<Vec<_>>>()?;
        Ok(TransformList::with_id(transforms, raw.id))
    }
}

impl From<TransformList> for RawTransform {
    fn from(list: TransformList) -> Self {
        let (id, transforms) = list.into_parts();
        RawTransform {
            kind: Some(LIST_TYPE.to_string()),
            id,
            spec_list: Some(transforms.into_iter().map(RawTransform::from).collect()),
            ..Default::default()
        }
    }
}

fn parse_numbers(class_name: &str, data_string: &str) -> TransformResult<Vec<f64>> {
    data_string
        .split_whitespace()
        .map(|field| {
            field.parse::<f64>().map_err(|_| {
                TransformError::malformed(format!("'{field}' is not a number in {class_name} dataString"))
            })
        })
        .collect()
}

fn expect_count(class_name: &str, values: &[f64], count: usize) -> TransformResult<()> {
    if values.len() != count {
        return Err(TransformError::malformed(format!(
            "{class_name} expects {count} parameters, got {}",
            values.len()
        )));
    }
    Ok(())
}

/// Build a leaf model from its class name and data string.
pub fn decode_leaf(class_name: &str, data_string: &str) -> TransformResult<LeafModel> {
    match class_name {
        AFFINE_CLASS => {
            let v = parse_numbers(class_name, data_string)?;
            expect_count(class_name, &v, 6)?;
            // column-major: m00 m10 m01 m11 b0 b1
            Ok(LeafModel::Affine(AffineModel::new(v[0], v[2], v[1], v[3], v[4], v[5])))
        }
        TRANSLATION_CLASS => {
            let v = parse_numbers(class_name, data_string)?;
            expect_count(class_name, &v, 2)?;
            Ok(LeafModel::Translation(TranslationModel::new(v[0], v[1])))
        }
        RIGID_CLASS => {
            let v = parse_numbers(class_name, data_string)?;
            expect_count(class_name, &v, 3)?;
            Ok(LeafModel::Rigid(RigidModel::new(v[0], v[1], v[2])))
        }
        SIMILARITY_CLASS => {
            let v = parse_numbers(class_name, data_string)?;
            expect_count(class_name, &v, 4)?;
            Ok(LeafModel::Similarity(SimilarityModel::new(v[0], v[1], v[2], v[3])))
        }
        POLYNOMIAL_CLASS => {
            let v = parse_numbers(class_name, data_string)?;
            Ok(LeafModel::Polynomial(Polynomial2D::from_parameters(&v)?))
        }
        NON_LINEAR_COORDINATE_CLASS => decode_non_linear(NonLinearClass::NonLinearCoordinateTransform, data_string),
        NON_LINEAR_CLASS => decode_non_linear(NonLinearClass::NonLinearTransform, data_string),
        LENS_CORRECTION_CLASS => decode_non_linear(NonLinearClass::LensCorrection, data_string),
        THIN_PLATE_SPLINE_CLASS => decode_thin_plate_spline(data_string),
        unknown => Err(TransformError::malformed(format!(
            "unknown transform class '{unknown}'"
        ))),
    }
}

fn non_linear_class_name(class: NonLinearClass) -> &'static str {
    match class {
        NonLinearClass::NonLinearCoordinateTransform => NON_LINEAR_COORDINATE_CLASS,
        NonLinearClass::NonLinearTransform => NON_LINEAR_CLASS,
        NonLinearClass::LensCorrection => LENS_CORRECTION_CLASS,
    }
}

fn decode_non_linear(class: NonLinearClass, data_string: &str) -> TransformResult<LeafModel> {
    let class_name = non_linear_class_name(class);
    let fields: Vec<&str> = data_string.split_whitespace().collect();

    let dimension: usize = parse_field(class_name, &fields, 0, "dimension")?;
    let length: usize = parse_field(class_name, &fields, 1, "length")?;
    if checked_coefficient_count(dimension) != Some(length) {
        return Err(TransformError::malformed(format!(
            "{class_name} dimension {dimension} does not have {length} coefficients"
        )));
    }
    // dimension, length, then beta (2L), mean (L), var (L), width, height
    let expected = length
        .checked_mul(4)
        .and_then(|n| n.checked_add(4))
        .ok_or_else(|| TransformError::malformed(format!("{class_name} length {length} is too large")))?;
    if fields.len() != expected {
        return Err(TransformError::malformed(format!(
            "{class_name} with length {length} expects {expected} fields, got {}",
            fields.len()
        )));
    }
    let width: u32 = parse_field(class_name, &fields, expected - 2, "width")?;
    let height: u32 = parse_field(class_name, &fields, expected - 1, "height")?;

    let values = parse_numbers(class_name, &fields[2..expected - 2].join(" "))?;
    let (beta, rest) = values.split_at(2 * length);
    let (norm_mean, norm_var) = rest.split_at(length);
    let beta = beta.chunks_exact(2).map(|pair| [pair[0], pair[1]]).collect();

    Ok(LeafModel::NonLinear {
        class,
        model: NonLinearModel::new(dimension, beta, norm_mean.to_vec(), norm_var.to_vec(), width, height)?,
    })
}

/// Parse `fields[k]` as an integer-like header or trailer value.
fn parse_field<T: FromStr>(class_name: &str, fields: &[&str], k: usize, name: &str) -> TransformResult<T> {
    let field = fields
        .get(k)
        .ok_or_else(|| TransformError::malformed(format!("{class_name} dataString lacks {name}")))?;
    field
        .parse()
        .map_err(|_| TransformError::malformed(format!("{class_name} {name} '{field}' is out of range")))
}

/// Big-endian `f64` values packed as standard base64.
fn decode_doubles(block: &str, expected: usize) -> TransformResult<Vec<f64>> {
    let bytes = STANDARD
        .decode(block)
        .map_err(|e| TransformError::malformed(format!("thin-plate spline block is not base64: {e}")))?;
    if Some(bytes.len()) != expected.checked_mul(8) {
        return Err(TransformError::malformed(format!(
            "thin-plate spline block holds {} bytes, expected {expected} doubles",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            f64::from_be_bytes(word)
        })
        .collect())
}

fn encode_doubles(values: impl IntoIterator<Item = f64>) -> String {
    let bytes: Vec<u8> = values.into_iter().flat_map(f64::to_be_bytes).collect();
    STANDARD.encode(bytes)
}

/// `ThinPlateSplineR2LogR ndims nLm affine|null landmarks+coefficients`.
///
/// The affine block is `A` row by row followed by `b`. The second block holds
/// the landmarks point by point, then the x coefficients of every landmark,
/// then the y coefficients.
fn decode_thin_plate_spline(data_string: &str) -> TransformResult<LeafModel> {
    let class_name = THIN_PLATE_SPLINE_CLASS;
    let fields: Vec<&str> = data_string.split_whitespace().collect();
    // an empty spline has no landmark block at all
    if !(4..=5).contains(&fields.len()) || fields[0] != TPS_KERNEL {
        return Err(TransformError::malformed(format!(
            "{class_name} dataString must be '{TPS_KERNEL} ndims nLm affine landmarks'"
        )));
    }
    let ndims: usize = parse_field(class_name, &fields, 1, "ndims")?;
    let count: usize = parse_field(class_name, &fields, 2, "nLm")?;
    if ndims != 2 {
        return Ok(LeafModel::Opaque(OpaqueModel {
            class_name: class_name.to_string(),
            data_string: data_string.to_string(),
        }));
    }

    let offset = match fields[3] {
        TPS_NO_AFFINE => None,
        block => {
            let v = decode_doubles(block, 6)?;
            Some(AffineModel::new(v[0], v[1], v[2], v[3], v[4], v[5]))
        }
    };
    let doubles = count
        .checked_mul(4)
        .ok_or_else(|| TransformError::malformed(format!("{class_name} nLm {count} is too large")))?;
    let v = decode_doubles(fields.get(4).copied().unwrap_or_default(), doubles)?;
    let (points, coefficients) = v.split_at(2 * count);
    let (dx, dy) = coefficients.split_at(count);
    let landmarks = points.chunks_exact(2).map(|p| Point::new(p[0], p[1])).collect();
    let coefficients = dx.iter().zip(dy).map(|(x, y)| [*x, *y]).collect();

    Ok(LeafModel::ThinPlateSpline(ThinPlateSpline::new(offset, landmarks, coefficients)?))
}

fn encode_thin_plate_spline(tps: &ThinPlateSpline) -> String {
    let affine = match tps.offset() {
        Some(a) => encode_doubles([a.m00, a.m01, a.m10, a.m11, a.b0, a.b1]),
        None => TPS_NO_AFFINE.to_string(),
    };
    let landmarks = tps.landmarks().iter().flat_map(|p| [p.x, p.y]);
    let dx = tps.coefficients().iter().map(|c| c[0]);
    let dy = tps.coefficients().iter().map(|c| c[1]);
    let encoded = format!(
        "{TPS_KERNEL} 2 {} {affine} {}",
        tps.len(),
        encode_doubles(landmarks.chain(dx).chain(dy))
    );
    encoded.trim_end().to_string()
}

/// Shortest representation that parses back to the identical `f64`.
fn format_number(v: f64) -> String {
    format!("{v:?}")
}

fn join_numbers<'a>(values: impl IntoIterator<Item = &'a f64>) -> String {
    values
        .into_iter()
        .map(|v| format_number(*v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Class name and data string for a leaf model.
pub fn encode_leaf(model: &LeafModel) -> (String, String) {
    match model {
        LeafModel::Affine(a) => (
            AFFINE_CLASS.to_string(),
            join_numbers(&[a.m00, a.m10, a.m01, a.m11, a.b0, a.b1]),
        ),
        LeafModel::Translation(t) => (TRANSLATION_CLASS.to_string(), join_numbers(&[t.tx, t.ty])),
        LeafModel::Rigid(r) => (RIGID_CLASS.to_string(), join_numbers(&[r.theta, r.tx, r.ty])),
        LeafModel::Similarity(s) => (
            SIMILARITY_CLASS.to_string(),
            join_numbers(&[s.scale, s.theta, s.tx, s.ty]),
        ),
        LeafModel::Polynomial(p) => (POLYNOMIAL_CLASS.to_string(), join_numbers(&p.parameters())),
        LeafModel::NonLinear { class, model } => {
            let (width, height) = model.size();
            let data = format!(
                "{} {} {} {} {} {} {}",
                model.dimension(),
                model.length(),
                join_numbers(model.beta().iter().flatten()),
                join_numbers(model.norm_mean()),
                join_numbers(model.norm_var()),
                width,
                height
            );
            (non_linear_class_name(*class).to_string(), data)
        }
        LeafModel::ThinPlateSpline(tps) => (THIN_PLATE_SPLINE_CLASS.to_string(), encode_thin_plate_spline(tps)),
        LeafModel::Opaque(o) => (o.class_name.clone(), o.data_string.clone()),
    }
}
