// Phase runner — pooled fan-out/fan-in over the replica sub-nets.
//
// Every training phase (reset/forward/loss/backward/update) runs the
// same closure on each replica and joins before returning, so no replica
// ever sees phase N+1 while another is still in phase N. The rayon pool
// replaces per-phase thread spawning while keeping those synchronous
// barrier semantics; a failing replica aborts the step with its error.

use rayon::prelude::*;

use stoat_core::Result;

use crate::net::SubNet;

/// Run `f` on every replica with join-all barrier semantics.
pub(crate) fn for_each_replica<F>(snets: &mut [SubNet], f: F) -> Result<()>
where
    F: Fn(&mut SubNet) -> Result<()> + Send + Sync,
{
    match snets {
        [] => Ok(()),
        [single] => f(single),
        many => many.par_iter_mut().map(|sn| f(sn)).collect::<Result<()>>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::SubNet;
    use stoat_core::{Device, Error};
    use stoat_nn::{Graph, Optimizer};

    fn subnets(n: usize) -> Vec<SubNet> {
        (0..n)
            .map(|_| SubNet {
                graph: Graph::new(Device::Cpu),
                optimizer: Optimizer::sgd(0.1, 0.0),
                fiterr: vec![(0.0, 0.0)],
            })
            .collect()
    }

    #[test]
    fn all_replicas_run_before_return() {
        let mut sn = subnets(4);
        for_each_replica(&mut sn, |s| {
            s.fiterr[0].0 += 1.0;
            Ok(())
        })
        .unwrap();
        assert!(sn.iter().all(|s| s.fiterr[0].0 == 1.0));
    }

    #[test]
    fn a_failing_replica_aborts_the_step() {
        let mut sn = subnets(3);
        let res = for_each_replica(&mut sn, |s| {
            if s.fiterr.len() == 1 {
                Err(Error::msg("replica failure"))
            } else {
                Ok(())
            }
        });
        assert!(res.is_err());
    }
}
