//! Versioned binary stream of named parameter values.
//!
//! Layout: 4-byte magic `ANN1`, little-endian u32 count of trainable
//! (non-underscore-prefixed) parameters matching the optional name filter, a
//! 4-byte `\n--\n` delimiter, then per parameter: u32 name length, name
//! bytes, u32 rank, rank u32 shape entries, u32 total element count, total
//! little-endian IEEE-754 f32 values, and the delimiter again. A bad magic or
//! delimiter anywhere is a fatal format error.

use std::collections::BTreeSet;
use std::io::{BufReader, Read, Write};

use anyhow::{bail, ensure, Context as _, Result};
use tracing::debug;

use crate::engine::Engine;
use crate::graph::Graph;
use crate::tensor::{Dimension, MAX_DIMENSION_COUNT};

const MAGIC: [u8; 4] = *b"ANN1";
const DELIMITER: [u8; 4] = [0x0a, b'-', b'-', 0x0a];

/// Minimal glob match supporting `*` (any run) and `?` (any one byte).
fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

fn matches_any(only: &[&str], name: &str) -> bool {
    only.is_empty() || only.iter().any(|p| glob_match(p, name))
}

fn write_u32<W: Write>(w: &mut W, value: u32) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_delimiter<R: Read>(r: &mut R) -> Result<()> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    if buf != DELIMITER {
        bail!("bad delimiter");
    }
    Ok(())
}

impl<E: Engine> Graph<E> {
    /// Writes every trainable (non-underscore-prefixed) parameter matching
    /// the optional glob filter, in sorted name order.
    pub fn save_params<W: Write>(&self, mut w: W, only: &[&str]) -> Result<()> {
        let selected: Vec<&str> = self
            .params
            .keys()
            .map(String::as_str)
            .filter(|n| !n.starts_with('_') && matches_any(only, n))
            .collect();

        w.write_all(&MAGIC)?;
        write_u32(&mut w, selected.len() as u32)?;
        w.write_all(&DELIMITER)?;

        for name in selected {
            let param = &self.params[name];
            write_u32(&mut w, name.len() as u32)?;
            w.write_all(name.as_bytes())?;
            let dim = param.dim();
            write_u32(&mut w, dim.rank() as u32)?;
            for &extent in dim.slice() {
                write_u32(&mut w, extent as u32)?;
            }
            write_u32(&mut w, dim.total() as u32)?;
            let values = param
                .values_f32()
                .with_context(|| format!("failed to read parameter '{name}'"))?;
            for v in values {
                w.write_all(&v.to_le_bytes())?;
            }
            w.write_all(&DELIMITER)?;
        }
        Ok(())
    }

    /// Loads a parameter stream into the live graph. Entries without a
    /// same-named graph parameter are skipped; an element-count mismatch is
    /// fatal. In forced mode every non-internal graph parameter must be
    /// present in the stream. A successful load marks the graph initialized.
    pub fn load_params<R: Read>(&mut self, r: R, forced: bool) -> Result<()> {
        let mut reader = ParamsReader::new(r)?;
        let mut ready: BTreeSet<String> = BTreeSet::new();

        while reader.has_more() {
            let (name, _, values) = reader.next()?;
            if let Some(param) = self.params.get(&name) {
                ensure!(
                    param.dim().total() == values.len(),
                    "bad dimension of '{name}' layer params or values total count is incorrect"
                );
                param.set_values(&values)?;
                ready.insert(name);
            }
        }

        if forced {
            for name in self.params.keys() {
                if !name.starts_with('_') && !ready.contains(name) {
                    bail!("layer '{name}' does not exist in params file");
                }
            }
        }

        debug!(loaded = ready.len(), forced, "loaded parameters");
        self.mark_initialized();
        Ok(())
    }
}

/// Streaming reader over a parameter binary stream.
#[derive(Debug)]
pub struct ParamsReader<R: Read> {
    r: BufReader<R>,
    remaining: usize,
}

impl<R: Read> ParamsReader<R> {
    /// Opens a stream, validating the magic, entry count and first
    /// delimiter.
    pub fn new(r: R) -> Result<Self> {
        let mut r = BufReader::new(r);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            bail!("bad magic");
        }
        let count = read_u32(&mut r)? as usize;
        read_delimiter(&mut r)?;
        Ok(ParamsReader {
            r,
            remaining: count,
        })
    }

    pub fn has_more(&self) -> bool {
        self.remaining > 0
    }

    /// Reads the next parameter entry: name, declared dimension and values.
    pub fn next(&mut self) -> Result<(String, Dimension, Vec<f32>)> {
        let name_len = read_u32(&mut self.r)? as usize;
        let mut name_bytes = vec![0u8; name_len];
        self.r.read_exact(&mut name_bytes)?;
        let name = String::from_utf8(name_bytes).context("parameter name is not UTF-8")?;

        let rank = read_u32(&mut self.r)? as usize;
        if rank > MAX_DIMENSION_COUNT {
            bail!("bad dimension of '{name}' layer params");
        }
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(read_u32(&mut self.r)? as usize);
        }
        let dim = Dimension::from_shape(&shape)
            .with_context(|| format!("bad dimension of '{name}' layer params"))?;

        let total = read_u32(&mut self.r)? as usize;
        if total != dim.total() {
            bail!("bad dimension of '{name}' layer params or values total count is incorrect");
        }
        let mut values = Vec::with_capacity(total);
        let mut buf = [0u8; 4];
        for _ in 0..total {
            self.r.read_exact(&mut buf)?;
            values.push(f32::from_le_bytes(buf));
        }
        read_delimiter(&mut self.r)?;

        self.remaining -= 1;
        Ok((name, dim, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&DELIMITER);
        let name = b"fc_weight";
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&6u32.to_le_bytes());
        for i in 0..6 {
            out.extend_from_slice(&(i as f32).to_le_bytes());
        }
        out.extend_from_slice(&DELIMITER);
        out
    }

    #[test]
    fn reader_walks_a_valid_stream() {
        let data = sample_stream();
        let mut reader = ParamsReader::new(data.as_slice()).unwrap();
        assert!(reader.has_more());
        let (name, dim, values) = reader.next().unwrap();
        assert_eq!(name, "fc_weight");
        assert_eq!(dim, crate::tensor::dim([2, 3]));
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(!reader.has_more());
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut data = sample_stream();
        data[0] = b'X';
        let err = ParamsReader::new(data.as_slice()).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn bad_leading_delimiter_is_fatal() {
        let mut data = sample_stream();
        data[8] = 0;
        let err = ParamsReader::new(data.as_slice()).unwrap_err();
        assert!(err.to_string().contains("bad delimiter"));
    }

    #[test]
    fn bad_trailing_delimiter_is_fatal() {
        let mut data = sample_stream();
        let last = data.len() - 1;
        data[last] = 0;
        let mut reader = ParamsReader::new(data.as_slice()).unwrap();
        let err = reader.next().unwrap_err();
        assert!(err.to_string().contains("bad delimiter"));
    }

    #[test]
    fn total_mismatch_is_fatal() {
        let mut data = sample_stream();
        // The total field sits right after magic+count+delim+len+name+rank+2 shapes.
        let total_at = 4 + 4 + 4 + 4 + 9 + 4 + 8;
        data[total_at..total_at + 4].copy_from_slice(&7u32.to_le_bytes());
        let mut reader = ParamsReader::new(data.as_slice()).unwrap();
        let err = reader.next().unwrap_err();
        assert!(err.to_string().contains("total count is incorrect"));
    }

    #[test]
    fn excessive_rank_is_fatal() {
        let mut data = sample_stream();
        let rank_at = 4 + 4 + 4 + 4 + 9;
        data[rank_at..rank_at + 4].copy_from_slice(&5u32.to_le_bytes());
        let mut reader = ParamsReader::new(data.as_slice()).unwrap();
        let err = reader.next().unwrap_err();
        assert!(err.to_string().contains("bad dimension"));
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("fc*", "fc01_weight"));
        assert!(glob_match("*_bias", "conv_bias"));
        assert!(glob_match("fc??", "fc01"));
        assert!(!glob_match("fc*", "conv_weight"));
        assert!(matches_any(&[], "whatever"));
        assert!(matches_any(&["a*", "b*"], "b1"));
        assert!(!matches_any(&["a*"], "b1"));
    }
}
