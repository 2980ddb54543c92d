//! Pipeline scheduling (§5): a bounded-buffer, data-flow pipeline of stages,
//! each run by a configurable number of worker threads.

use std::collections::BTreeMap;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::tray::Tray;

/// One pipeline stage: a pure `Tray -> Tray` transform. Implementations may
/// reject the tray (set `Tray::rejection`) instead of erroring; only a fatal,
/// pipeline-wide condition should panic or be surfaced through the runner.
pub trait Stage: Send + Sync {
    fn process(&self, tray: Tray) -> Tray;
}

impl<F: Fn(Tray) -> Tray + Send + Sync> Stage for F {
    fn process(&self, tray: Tray) -> Tray {
        self(tray)
    }
}

/// Runs `stage` with `workers` threads pulling from `input` and pushing to a
/// freshly created, bounded output channel (capacity `2 * workers`, per the
/// default backpressure bound named in §5). Already-rejected trays pass
/// through untouched so later stages can see the rejection and skip work.
pub fn run_stage(
    stage: impl Stage + 'static,
    input: Receiver<Tray>,
    workers: usize,
) -> Receiver<Tray> {
    let workers = workers.max(1);
    let (tx, rx) = bounded(2 * workers);
    let stage = std::sync::Arc::new(stage);

    for _ in 0..workers {
        let input = input.clone();
        let tx = tx.clone();
        let stage = stage.clone();
        std::thread::spawn(move || {
            while let Ok(tray) = input.recv() {
                let tray = if tray.is_rejected() {
                    tray
                } else {
                    stage.process(tray)
                };
                if tx.send(tray).is_err() {
                    break;
                }
            }
        });
    }
    rx
}

/// Feeds a bounded input channel from an iterator of trays (the reader
/// stage), closing it once exhausted.
pub fn feed(trays: impl IntoIterator<Item = Tray> + Send + 'static, buffer: usize) -> Receiver<Tray> {
    let (tx, rx) = bounded(buffer.max(1));
    std::thread::spawn(move || {
        for tray in trays {
            if tx.send(tray).is_err() {
                break;
            }
        }
    });
    rx
}

/// Reorders trays by `sequence_number` before they reach the writer, per
/// §5's "if ordered output is requested". Buffers out-of-order arrivals in a
/// `BTreeMap` keyed by sequence number and releases the longest run starting
/// at the next expected number.
pub struct Sequencer {
    input: Receiver<Tray>,
    pending: BTreeMap<u64, Tray>,
    next: u64,
}

impl Sequencer {
    pub fn new(input: Receiver<Tray>, start: u64) -> Sequencer {
        Sequencer {
            input,
            pending: BTreeMap::new(),
            next: start,
        }
    }
}

impl Iterator for Sequencer {
    type Item = Tray;

    fn next(&mut self) -> Option<Tray> {
        loop {
            if let Some(tray) = self.pending.remove(&self.next) {
                self.next += 1;
                return Some(tray);
            }
            match self.input.recv() {
                Ok(tray) => {
                    self.pending.insert(tray.sequence_number, tray);
                }
                Err(_) => {
                    // Channel closed with a gap (a tray never arrived); drain
                    // whatever remains in arrival order rather than stalling.
                    return self.pending.pop_first().map(|(seq, tray)| {
                        self.next = seq + 1;
                        tray
                    });
                }
            }
        }
    }
}

/// Collects every tray from `output` into a vector, used by callers (and
/// tests) that don't need streaming consumption.
pub fn drain(output: Receiver<Tray>) -> Vec<Tray> {
    output.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cseq::CSeq;

    fn tray(seq: u64) -> Tray {
        Tray::new(seq, CSeq::new(format!("q{seq}")))
    }

    #[test]
    fn run_stage_applies_transform_to_every_tray() {
        let input = feed(vec![tray(1), tray(2), tray(3)], 4);
        let output = run_stage(
            |mut t: Tray| {
                t.push_log("touched");
                t
            },
            input,
            2,
        );
        let mut results = drain(output);
        results.sort_by_key(|t| t.sequence_number);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|t| t.log().contains(&"touched".to_string())));
    }

    #[test]
    fn rejected_trays_skip_stage_processing() {
        let mut rejected = tray(1);
        rejected.reject(crate::tray::Rejection::TooShort { length: 1, minimum: 20 });
        let input = feed(vec![rejected], 1);
        let output = run_stage(
            |mut t: Tray| {
                t.push_log("should not run");
                t
            },
            input,
            1,
        );
        let results = drain(output);
        assert_eq!(results.len(), 1);
        assert!(!results[0].log().iter().any(|l| l == "should not run"));
    }

    #[test]
    fn sequencer_reorders_out_of_order_arrivals() {
        let (tx, rx) = bounded(8);
        tx.send(tray(2)).unwrap();
        tx.send(tray(1)).unwrap();
        tx.send(tray(3)).unwrap();
        drop(tx);
        let ordered: Vec<u64> = Sequencer::new(rx, 1).map(|t| t.sequence_number).collect();
        assert_eq!(ordered, vec![1, 2, 3]);
    }
}
