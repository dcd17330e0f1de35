//! Per-operator shape rules.
//!
//! Inference is bidirectional where the operator semantics pin parameter
//! shapes (fully-connected weights, convolution filters, batch-norm scales):
//! a rule may fill in unknown input slots in addition to returning the node's
//! output shape. Shapes the rules cannot determine stay unknown; the caller
//! omits them from its result instead of failing.

use std::collections::BTreeMap;

use symnet::engine::{EngineError, EngineResult, OpId};

pub(crate) type Shape = Vec<usize>;

fn attr<'a>(attrs: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    attrs.get(key).map(String::as_str)
}

fn flag(attrs: &BTreeMap<String, String>, key: &str) -> bool {
    attr(attrs, key) == Some("1")
}

fn parse_usize(value: &str, what: &str) -> EngineResult<usize> {
    value
        .parse()
        .map_err(|_| EngineError::Shape(format!("bad {what} attribute '{value}'")))
}

/// Parses a window attribute: either a single extent (`"3"`) or a tuple
/// (`"(3,3)"`).
fn parse_window(value: &str) -> EngineResult<Vec<usize>> {
    let inner = value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .unwrap_or(value);
    inner
        .split(',')
        .map(|p| parse_usize(p.trim(), "window"))
        .collect()
}

fn parse_axes(value: &str) -> EngineResult<Vec<i64>> {
    let inner = value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .unwrap_or(value);
    inner
        .split(',')
        .map(|p| {
            p.trim()
                .parse()
                .map_err(|_| EngineError::Shape(format!("bad axis attribute '{value}'")))
        })
        .collect()
}

/// Parses a slice bound tuple like `"(None,2)"` into per-axis options.
fn parse_bounds(value: &str) -> EngineResult<Vec<Option<usize>>> {
    let inner = value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| EngineError::Shape(format!("bad slice bound '{value}'")))?;
    inner
        .split(',')
        .map(|p| {
            let p = p.trim();
            if p == "None" {
                Ok(None)
            } else {
                parse_usize(p, "slice bound").map(Some)
            }
        })
        .collect()
}

fn normalize_axis(axis: i64, rank: usize) -> EngineResult<usize> {
    let a = if axis < 0 { axis + rank as i64 } else { axis };
    if a < 0 || a as usize >= rank {
        return Err(EngineError::Shape(format!(
            "axis {axis} out of range for rank {rank}"
        )));
    }
    Ok(a as usize)
}

fn fill_if_unknown(slot: Option<&mut Option<Shape>>, shape: Shape) {
    if let Some(slot) = slot {
        if slot.is_none() {
            *slot = Some(shape);
        }
    }
}

fn window_of(
    attrs: &BTreeMap<String, String>,
    key: &str,
    len: usize,
    default: usize,
) -> EngineResult<Vec<usize>> {
    match attr(attrs, key) {
        Some(value) => {
            let mut w = parse_window(value)?;
            w.resize(len, default);
            Ok(w)
        }
        None => Ok(vec![default; len]),
    }
}

/// Computes the output shape of one operator and backfills inferable input
/// shapes. Returns `None` when the inputs known so far do not determine the
/// output.
pub(crate) fn infer_node(
    op: OpId,
    attrs: &BTreeMap<String, String>,
    ins: &mut [Option<Shape>],
) -> EngineResult<Option<Shape>> {
    use OpId::*;
    match op {
        // Shape-preserving unary operators.
        Activation | Softmax | LogSoftmax | SoftmaxActivation | Sigmoid | HardSigmoid | Tanh
        | Relu | Log | Exp | Cosh | Sin | Abs | Square | Sqrt | Not | Dropout | MakeLoss
        | BlockGrad | ZerosLike | OnesLike | AddScalar | SubScalar | SubScalarR | MulScalar
        | DivScalar | DivScalarR | PowerScalar | PowerScalarR | LeScalar | GeScalar | EqScalar
        | NeScalar | LesserScalar | GreaterScalar | SoftmaxOutput => {
            Ok(ins.first().and_then(Clone::clone))
        }

        // Element-wise binary operators constrain both sides to one shape.
        Add | Sub | Mul | Div | Power | Le | Ge | Eq | Ne | Lesser | Greater | And | Or | Xor => {
            let known = ins.iter().flatten().next().cloned();
            if let Some(shape) = &known {
                for slot in ins.iter_mut() {
                    if slot.is_none() {
                        *slot = Some(shape.clone());
                    }
                }
            }
            Ok(known)
        }

        // Broadcast operators follow the left-hand side.
        BroadcastAdd | BroadcastSub | BroadcastMul | BroadcastDiv => {
            Ok(ins.first().and_then(Clone::clone))
        }

        Dot => {
            let (a, b) = match (ins.first().cloned().flatten(), ins.get(1).cloned().flatten()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Ok(None),
            };
            if a.len() != 2 || b.len() != 2 {
                return Err(EngineError::Shape(format!(
                    "dot expects rank-2 inputs, got {a:?} x {b:?}"
                )));
            }
            if a[1] != b[0] {
                return Err(EngineError::Shape(format!(
                    "dot inner extents differ: {a:?} x {b:?}"
                )));
            }
            Ok(Some(vec![a[0], b[1]]))
        }

        FullyConnected => {
            let data = match ins.first().cloned().flatten() {
                Some(data) => data,
                None => return Ok(None),
            };
            let hidden = parse_usize(
                attr(attrs, "num_hidden")
                    .ok_or_else(|| EngineError::Shape("fully_connected without num_hidden".into()))?,
                "num_hidden",
            )?;
            let flatten = flag(attrs, "flatten");
            let features = if flatten {
                data[1..].iter().product()
            } else {
                *data
                    .last()
                    .ok_or_else(|| EngineError::Shape("fully_connected on rank-0 data".into()))?
            };
            let mut rest = ins.iter_mut().skip(1);
            fill_if_unknown(rest.next(), vec![hidden, features]);
            fill_if_unknown(rest.next(), vec![hidden]);
            if flatten {
                Ok(Some(vec![data[0], hidden]))
            } else {
                let mut out = data;
                *out.last_mut().expect("non-empty data") = hidden;
                Ok(Some(out))
            }
        }

        Convolution => {
            let data = match ins.first().cloned().flatten() {
                Some(data) => data,
                None => return Ok(None),
            };
            if data.len() < 3 {
                return Err(EngineError::Shape(format!(
                    "convolution expects batched channel data, got {data:?}"
                )));
            }
            let filters = parse_usize(
                attr(attrs, "num_filter")
                    .ok_or_else(|| EngineError::Shape("convolution without num_filter".into()))?,
                "num_filter",
            )?;
            let groups = match attr(attrs, "num_group") {
                Some(value) => parse_usize(value, "num_group")?,
                None => 1,
            };
            let spatial = &data[2..];
            let kernel = window_of(attrs, "kernel", spatial.len(), 1)?;
            let stride = window_of(attrs, "stride", spatial.len(), 1)?;
            let pad = window_of(attrs, "pad", spatial.len(), 0)?;

            let mut weight = vec![filters, data[1] / groups.max(1)];
            weight.extend_from_slice(&kernel);
            let mut rest = ins.iter_mut().skip(1);
            fill_if_unknown(rest.next(), weight);
            fill_if_unknown(rest.next(), vec![filters]);

            let mut out = vec![data[0], filters];
            for ((&x, (&k, &s)), &p) in spatial
                .iter()
                .zip(kernel.iter().zip(stride.iter()))
                .zip(pad.iter())
            {
                let padded = x + 2 * p;
                if padded < k {
                    return Err(EngineError::Shape(format!(
                        "kernel {k} exceeds padded extent {padded}"
                    )));
                }
                out.push((padded - k) / s.max(1) + 1);
            }
            Ok(Some(out))
        }

        Pooling => {
            let data = match ins.first().cloned().flatten() {
                Some(data) => data,
                None => return Ok(None),
            };
            if data.len() < 3 {
                return Err(EngineError::Shape(format!(
                    "pooling expects batched channel data, got {data:?}"
                )));
            }
            let spatial = &data[2..];
            let kernel = window_of(attrs, "kernel", spatial.len(), 1)?;
            let stride = window_of(attrs, "stride", spatial.len(), 1)?;
            let pad = window_of(attrs, "pad", spatial.len(), 0)?;
            let full = attr(attrs, "pooling_convention") == Some("full");
            let mut out = vec![data[0], data[1]];
            for ((&x, (&k, &s)), &p) in spatial
                .iter()
                .zip(kernel.iter().zip(stride.iter()))
                .zip(pad.iter())
            {
                let padded = x + 2 * p;
                if padded < k {
                    return Err(EngineError::Shape(format!(
                        "kernel {k} exceeds padded extent {padded}"
                    )));
                }
                let span = padded - k;
                let s = s.max(1);
                out.push(if full {
                    span.div_ceil(s) + 1
                } else {
                    span / s + 1
                });
            }
            Ok(Some(out))
        }

        BatchNorm => {
            let data = match ins.first().cloned().flatten() {
                Some(data) => data,
                None => return Ok(None),
            };
            let axis = match attr(attrs, "axis") {
                Some(value) => normalize_axis(
                    value.parse::<i64>().map_err(|_| {
                        EngineError::Shape(format!("bad batch_norm axis '{value}'"))
                    })?,
                    data.len(),
                )?,
                None => 1,
            };
            let channels = *data
                .get(axis)
                .ok_or_else(|| EngineError::Shape("batch_norm axis out of range".into()))?;
            for slot in ins.iter_mut().skip(1) {
                if slot.is_none() {
                    *slot = Some(vec![channels]);
                }
            }
            Ok(Some(data))
        }

        Flatten => Ok(ins.first().cloned().flatten().map(|data| {
            let rest: usize = data[1..].iter().product();
            vec![data[0], rest]
        })),

        Pick => {
            let data = match ins.first().cloned().flatten() {
                Some(data) => data,
                None => return Ok(None),
            };
            if flag(attrs, "keepdims") {
                Ok(Some(vec![data[0], 1]))
            } else {
                Ok(Some(vec![data[0]]))
            }
        }

        SoftmaxCrossEntropy => Ok(Some(vec![1])),

        Sum | SumNan | Mean => {
            let data = match ins.first().cloned().flatten() {
                Some(data) => data,
                None => return Ok(None),
            };
            let keepdims = flag(attrs, "keepdims");
            let exclude = flag(attrs, "exclude");
            let axes = match attr(attrs, "axis") {
                Some(value) => parse_axes(value)?
                    .into_iter()
                    .map(|a| normalize_axis(a, data.len()))
                    .collect::<EngineResult<Vec<_>>>()?,
                None => (0..data.len()).collect(),
            };
            let reduced: Vec<bool> = (0..data.len())
                .map(|i| axes.contains(&i) != exclude)
                .collect();
            let mut out = Vec::new();
            for (i, &x) in data.iter().enumerate() {
                if reduced[i] {
                    if keepdims {
                        out.push(1);
                    }
                } else {
                    out.push(x);
                }
            }
            if out.is_empty() {
                out.push(1);
            }
            Ok(Some(out))
        }

        Stack => {
            let shape = match ins.iter().flatten().next().cloned() {
                Some(shape) => shape,
                None => return Ok(None),
            };
            let n = ins.len();
            let tail = attr(attrs, "axis") == Some("-1");
            let mut out = shape;
            if tail {
                out.push(n);
            } else {
                out.insert(0, n);
            }
            Ok(Some(out))
        }

        Concat => {
            if ins.iter().any(Option::is_none) {
                return Ok(None);
            }
            let axis = match attr(attrs, "axis") {
                Some(value) => parse_usize(value, "axis")?,
                None => 1,
            };
            let first = ins[0].clone().expect("checked above");
            let mut out = first;
            if axis >= out.len() {
                return Err(EngineError::Shape(format!(
                    "concat axis {axis} out of range for {out:?}"
                )));
            }
            out[axis] = ins
                .iter()
                .map(|s| s.as_ref().expect("checked above")[axis])
                .sum();
            Ok(Some(out))
        }

        Transpose => {
            let data = match ins.first().cloned().flatten() {
                Some(data) => data,
                None => return Ok(None),
            };
            let order: Vec<usize> = match attr(attrs, "axes") {
                Some(value) => parse_axes(value)?
                    .into_iter()
                    .map(|a| normalize_axis(a, data.len()))
                    .collect::<EngineResult<Vec<_>>>()?,
                None => (0..data.len()).rev().collect(),
            };
            Ok(Some(order.into_iter().map(|i| data[i]).collect()))
        }

        SwapAxis => {
            let mut data = match ins.first().cloned().flatten() {
                Some(data) => data,
                None => return Ok(None),
            };
            let a = parse_usize(attr(attrs, "dim1").unwrap_or("0"), "dim1")?;
            let b = parse_usize(attr(attrs, "dim2").unwrap_or("0"), "dim2")?;
            if a >= data.len() || b >= data.len() {
                return Err(EngineError::Shape("swap_axis axis out of range".into()));
            }
            data.swap(a, b);
            Ok(Some(data))
        }

        Slice => {
            let data = match ins.first().cloned().flatten() {
                Some(data) => data,
                None => return Ok(None),
            };
            let begin = parse_bounds(
                attr(attrs, "begin")
                    .ok_or_else(|| EngineError::Shape("slice without begin".into()))?,
            )?;
            let end = parse_bounds(
                attr(attrs, "end").ok_or_else(|| EngineError::Shape("slice without end".into()))?,
            )?;
            let mut out = data.clone();
            for (i, extent) in out.iter_mut().enumerate() {
                let b = begin.get(i).copied().flatten().unwrap_or(0);
                let e = end.get(i).copied().flatten().unwrap_or(data[i]);
                if b > e || e > data[i] {
                    return Err(EngineError::Shape(format!(
                        "slice [{b}, {e}) out of range for extent {}",
                        data[i]
                    )));
                }
                *extent = e - b;
            }
            Ok(Some(out))
        }

        Reshape | Zeros | Ones | RandomUniform | RandomNormal => {
            let shape = attr(attrs, "shape")
                .ok_or_else(|| EngineError::Shape(format!("{} without shape", op.name())))?;
            Ok(Some(parse_window(shape)?))
        }

        ReshapeLike => Ok(ins.get(1).cloned().flatten()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn fully_connected_pins_weight_and_bias_shapes() {
        let a = attrs(&[("num_hidden", "10"), ("flatten", "1")]);
        let mut ins = vec![Some(vec![2, 1, 28, 28]), None, None];
        let out = infer_node(OpId::FullyConnected, &a, &mut ins).unwrap();
        assert_eq!(out, Some(vec![2, 10]));
        assert_eq!(ins[1], Some(vec![10, 784]));
        assert_eq!(ins[2], Some(vec![10]));
    }

    #[test]
    fn convolution_shapes_follow_kernel_and_stride() {
        let a = attrs(&[("num_filter", "24"), ("kernel", "(3,3)")]);
        let mut ins = vec![Some(vec![2, 1, 28, 28]), None, None];
        let out = infer_node(OpId::Convolution, &a, &mut ins).unwrap();
        assert_eq!(out, Some(vec![2, 24, 26, 26]));
        assert_eq!(ins[1], Some(vec![24, 1, 3, 3]));
        assert_eq!(ins[2], Some(vec![24]));
    }

    #[test]
    fn pooling_conventions_round_differently() {
        let valid = attrs(&[
            ("kernel", "(2,2)"),
            ("stride", "(2,2)"),
            ("pool_type", "max"),
            ("pooling_convention", "valid"),
        ]);
        let mut ins = vec![Some(vec![2, 24, 27, 27])];
        assert_eq!(
            infer_node(OpId::Pooling, &valid, &mut ins).unwrap(),
            Some(vec![2, 24, 13, 13])
        );
        let full = attrs(&[
            ("kernel", "(2,2)"),
            ("stride", "(2,2)"),
            ("pool_type", "max"),
            ("pooling_convention", "full"),
        ]);
        let mut ins = vec![Some(vec![2, 24, 27, 27])];
        assert_eq!(
            infer_node(OpId::Pooling, &full, &mut ins).unwrap(),
            Some(vec![2, 24, 14, 14])
        );
    }

    #[test]
    fn elementwise_binary_backfills_the_unknown_side() {
        let a = attrs(&[]);
        let mut ins = vec![Some(vec![2, 3]), None];
        let out = infer_node(OpId::Add, &a, &mut ins).unwrap();
        assert_eq!(out, Some(vec![2, 3]));
        assert_eq!(ins[1], Some(vec![2, 3]));
    }

    #[test]
    fn reductions_respect_axis_keepdims_and_exclude() {
        let mut ins = vec![Some(vec![2, 3, 4])];
        assert_eq!(
            infer_node(OpId::Sum, &attrs(&[("axis", "-1")]), &mut ins).unwrap(),
            Some(vec![2, 3])
        );
        let mut ins = vec![Some(vec![2, 3, 4])];
        assert_eq!(
            infer_node(
                OpId::Sum,
                &attrs(&[("axis", "-1"), ("keepdims", "1")]),
                &mut ins
            )
            .unwrap(),
            Some(vec![2, 3, 1])
        );
        let mut ins = vec![Some(vec![2, 3, 4])];
        assert_eq!(
            infer_node(
                OpId::Sum,
                &attrs(&[("axis", "0"), ("exclude", "1")]),
                &mut ins
            )
            .unwrap(),
            Some(vec![2])
        );
        let mut ins = vec![Some(vec![2, 3, 4])];
        assert_eq!(
            infer_node(OpId::Mean, &attrs(&[]), &mut ins).unwrap(),
            Some(vec![1])
        );
    }

    #[test]
    fn slice_parses_none_prefixed_bounds() {
        let a = attrs(&[("begin", "(None,2)"), ("end", "(None,5)")]);
        let mut ins = vec![Some(vec![4, 8])];
        assert_eq!(
            infer_node(OpId::Slice, &a, &mut ins).unwrap(),
            Some(vec![4, 3])
        );
    }

    #[test]
    fn generators_read_their_shape_attribute() {
        let a = attrs(&[("shape", "(2,10)")]);
        let mut ins = Vec::new();
        assert_eq!(
            infer_node(OpId::Zeros, &a, &mut ins).unwrap(),
            Some(vec![2, 10])
        );
    }
}
