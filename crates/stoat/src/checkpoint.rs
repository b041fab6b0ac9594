// Checkpoint — binary save/load of parameter tensors.
//
// Format (all little-endian):
//
//   magic:   [u8; 4] = b"STOA"
//   version: u32     = 1
//   count:   u32     = number of tensors
//
//   per tensor:
//     key_len: u32, key: UTF-8 "layer_name/param_index"
//     ndim:    u32, dims: [u32; ndim]
//     data:    [f32; product(dims)]
//
// Parameters are keyed by layer name, walked in topological order;
// shared slots are written once under the first layer that owns them.
// Load writes the master graph and broadcasts to every replica.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use stoat_core::{bail, Error, Result, Tensor};

use crate::net::Net;

const MAGIC: &[u8; 4] = b"STOA";
const VERSION: u32 = 1;

impl Net {
    /// Save all parameters, keyed by layer name.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.collect_params()?;
        let entries = self.named_params();
        let mut w = BufWriter::new(File::create(path)?);
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&(entries.len() as u32).to_le_bytes())?;
        for (key, slot) in &entries {
            let t = &self.graph.params[*slot];
            w.write_all(&(key.len() as u32).to_le_bytes())?;
            w.write_all(key.as_bytes())?;
            w.write_all(&(t.rank() as u32).to_le_bytes())?;
            for &d in t.dims() {
                w.write_all(&(d as u32).to_le_bytes())?;
            }
            for v in t.data() {
                w.write_all(&v.to_le_bytes())?;
            }
        }
        w.flush()?;
        Ok(())
    }

    /// Load parameters saved by [`Net::save`] into the master graph and
    /// broadcast them to every replica.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let mut r = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail!("checkpoint: bad magic {:?}", magic);
        }
        let version = read_u32(&mut r)?;
        if version != VERSION {
            bail!("checkpoint: unsupported version {version}");
        }
        let count = read_u32(&mut r)? as usize;

        let mut loaded: HashMap<String, Tensor> = HashMap::with_capacity(count);
        for _ in 0..count {
            let key_len = read_u32(&mut r)? as usize;
            let mut key = vec![0u8; key_len];
            r.read_exact(&mut key)?;
            let key = String::from_utf8(key)
                .map_err(|_| Error::msg("checkpoint: key is not valid UTF-8"))?;
            let ndim = read_u32(&mut r)? as usize;
            let mut dims = Vec::with_capacity(ndim);
            for _ in 0..ndim {
                dims.push(read_u32(&mut r)? as usize);
            }
            let len: usize = dims.iter().product::<usize>().max(1);
            let mut data = vec![0f32; len];
            for v in data.iter_mut() {
                let mut b = [0u8; 4];
                r.read_exact(&mut b)?;
                *v = f32::from_le_bytes(b);
            }
            loaded.insert(key, Tensor::from_vec(data, dims, self.graph.device)?);
        }

        for (key, slot) in self.named_params() {
            let src = loaded
                .get(&key)
                .ok_or_else(|| Error::msg(format!("checkpoint: missing tensor '{key}'")))?;
            if src.shape() != self.graph.params[slot].shape() {
                return Err(Error::ShapeMismatch {
                    expected: self.graph.params[slot].shape().clone(),
                    got: src.shape().clone(),
                });
            }
            self.graph.params[slot].copy_from(src)?;
        }
        self.broadcast_params()
    }

    /// `(key, slot)` for every distinct parameter, in topological layer
    /// order; shared slots belong to the first layer that holds them.
    fn named_params(&self) -> Vec<(String, usize)> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut out = Vec::new();
        for layer in &self.graph.layers {
            for (i, p) in layer.params.iter().enumerate() {
                if seen.insert(p.0) {
                    out.push((format!("{}/{}", layer.name, i), p.0));
                }
            }
        }
        out
    }
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}
