// Introspection — text summary and Graphviz plot of the master graph.
//
// Both walk the topologically ordered layer list; the DOT file is the
// hand-off point for external graph-rendering tools.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use stoat_core::Result;

use crate::net::Net;

impl Net {
    /// Human-readable table of the net's layers.
    pub fn summary(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("model: {}\n", self.name));
        s.push_str(&format!(
            "{:<16} {:<24} {:<16} {:>10}\n",
            "layer", "kind", "output", "params"
        ));
        s.push_str(&"-".repeat(68));
        s.push('\n');

        let mut counted: HashSet<usize> = HashSet::new();
        let mut total = 0usize;
        for layer in &self.graph.layers {
            let mut params = 0usize;
            for p in &layer.params {
                params += self.graph.params[p.0].elem_count();
                if counted.insert(p.0) {
                    total += self.graph.params[p.0].elem_count();
                }
            }
            s.push_str(&format!(
                "{:<16} {:<24} {:<16} {:>10}\n",
                layer.name,
                layer.kind.describe(),
                layer.output.shape().to_string(),
                params
            ));
        }
        s.push_str(&"-".repeat(68));
        s.push('\n');
        s.push_str(&format!("total params: {total}\n"));
        s.push_str(&format!(
            "inputs: {}  outputs: {}  replicas: {}\n",
            self.lin.len(),
            self.lout.len(),
            self.replica_count()
        ));
        s
    }

    /// Write the graph as a Graphviz DOT file.
    pub fn plot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut f = File::create(path)?;
        writeln!(f, "digraph \"{}\" {{", self.name)?;
        writeln!(f, "  rankdir=LR;")?;
        writeln!(f, "  node [shape=record, fontsize=10];")?;
        for layer in &self.graph.layers {
            writeln!(
                f,
                "  \"{}\" [label=\"{{{}|{}|{}}}\"];",
                layer.name,
                layer.name,
                layer.kind.describe(),
                layer.output.shape()
            )?;
        }
        for layer in &self.graph.layers {
            for child in &layer.children {
                writeln!(
                    f,
                    "  \"{}\" -> \"{}\";",
                    layer.name,
                    self.graph.layer(*child).name
                )?;
            }
        }
        writeln!(f, "}}")?;
        Ok(())
    }
}
