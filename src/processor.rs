//! A chain of user-supplied algorithm steps run in sequence for one trigger.

use std::sync::Arc;

use crate::frame::Frame;

/// Outcome of one `Op::peek`/`Op::process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Succ,
    Fail,
    Ignore,
    Fatal,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Succ | Status::Ignore)
    }
}

/// One algorithm step. `frames` holds the trigger frame plus every bundled input, in
/// declaration order; `latests` holds the `latest[]` fetches. Both may contain `None`
/// where a lookup missed.
pub trait Op: Send {
    /// One-time setup. Receives the op's own `config` string (a file path in the
    /// reference; here, an opaque blob the concrete op interprets itself).
    fn init(&mut self, config: Option<&str>) -> bool;

    /// Default peek delegates to `process` with no `latest` data, matching the
    /// reference base class.
    fn peek(&mut self, frames: &[Option<Arc<Frame>>], out: &mut Option<Frame>) -> Status {
        self.process(frames, &[], out)
    }

    fn process(
        &mut self,
        frames: &[Option<Arc<Frame>>],
        latests: &[Option<Arc<Frame>>],
        out: &mut Option<Frame>,
    ) -> Status;

    fn name(&self) -> &str;
}

/// Runs a fixed list of [`Op`]s in order against one shared input bundle.
///
/// `valid` holds the indices of ops that are not bypassed and initialized successfully;
/// `peek`/`process` only ever touch those.
pub struct SeqProcessor {
    ops: Vec<Box<dyn Op>>,
    bypassed: Vec<bool>,
    valid: Vec<usize>,
    ignore_fail: bool,
    min_input: usize,
    max_input: usize,
    min_output: usize,
    max_output: usize,
}

impl SeqProcessor {
    pub fn new(ops: Vec<Box<dyn Op>>, bypassed: Vec<bool>, ignore_fail: bool) -> Self {
        assert_eq!(ops.len(), bypassed.len());
        Self {
            ops,
            bypassed,
            valid: Vec::new(),
            ignore_fail,
            min_input: 0,
            max_input: usize::MAX,
            min_output: 0,
            max_output: usize::MAX,
        }
    }

    /// Validate the event-name array sizes declared by the operator against the
    /// head/tail op's declared arity, then run `init` on every non-bypassed op.
    pub fn init(&mut self, num_inputs: usize, num_outputs: usize, configs: &[Option<String>]) -> bool {
        if num_inputs < self.min_input || num_inputs > self.max_input {
            log::error!(
                "io_sanity_check failed: {num_inputs} inputs outside [{}, {}]",
                self.min_input,
                self.max_input
            );
            return false;
        }
        if num_outputs < self.min_output || num_outputs > self.max_output {
            log::error!(
                "io_sanity_check failed: {num_outputs} outputs outside [{}, {}]",
                self.min_output,
                self.max_output
            );
            return false;
        }

        self.valid.clear();
        for (i, op) in self.ops.iter_mut().enumerate() {
            if self.bypassed[i] {
                continue;
            }
            let cfg = configs.get(i).and_then(|c| c.as_deref());
            if !op.init(cfg) {
                log::error!("op[{}] `{}` failed to init", i, op.name());
                return false;
            }
            self.valid.push(i);
        }
        true
    }

    /// Declare the arity bounds the head/tail op requires, read from its own `Op`.
    pub fn set_io_bounds(&mut self, min_input: usize, max_input: usize, min_output: usize, max_output: usize) {
        self.min_input = min_input;
        self.max_input = max_input;
        self.min_output = min_output;
        self.max_output = max_output;
    }

    pub fn peek(&mut self, frames: &[Option<Arc<Frame>>], out: &mut Option<Frame>) -> Status {
        for &i in &self.valid.clone() {
            let status = self.ops[i].peek(frames, out);
            if !status.is_success() && !self.ignore_fail {
                return status;
            }
        }
        Status::Succ
    }

    pub fn process(
        &mut self,
        frames: &[Option<Arc<Frame>>],
        latests: &[Option<Arc<Frame>>],
        out: &mut Option<Frame>,
    ) -> Status {
        for &i in &self.valid.clone() {
            let status = self.ops[i].process(frames, latests, out);
            if !status.is_success() && !self.ignore_fail {
                return status;
            }
        }
        Status::Succ
    }

    pub fn valid_indices(&self) -> &[usize] {
        &self.valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        name: String,
        fail_on_process: bool,
    }

    impl Op for Echo {
        fn init(&mut self, _config: Option<&str>) -> bool {
            true
        }

        fn process(
            &mut self,
            _frames: &[Option<Arc<Frame>>],
            _latests: &[Option<Arc<Frame>>],
            out: &mut Option<Frame>,
        ) -> Status {
            if self.fail_on_process {
                return Status::Fail;
            }
            *out = Some(Frame::new(1, &self.name, serde_json::Value::Null));
            Status::Succ
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn sequence_runs_all_ops_and_reports_last_output() {
        let ops: Vec<Box<dyn Op>> = vec![
            Box::new(Echo { name: "a".into(), fail_on_process: false }),
            Box::new(Echo { name: "b".into(), fail_on_process: false }),
        ];
        let mut proc = SeqProcessor::new(ops, vec![false, false], false);
        assert!(proc.init(0, 0, &[None, None]));
        let mut out = None;
        let status = proc.process(&[], &[], &mut out);
        assert_eq!(status, Status::Succ);
        assert_eq!(out.unwrap().sender, "b");
    }

    #[test]
    fn failure_short_circuits_without_ignore_fail() {
        let ops: Vec<Box<dyn Op>> = vec![
            Box::new(Echo { name: "a".into(), fail_on_process: true }),
            Box::new(Echo { name: "b".into(), fail_on_process: false }),
        ];
        let mut proc = SeqProcessor::new(ops, vec![false, false], false);
        assert!(proc.init(0, 0, &[None, None]));
        let mut out = None;
        let status = proc.process(&[], &[], &mut out);
        assert_eq!(status, Status::Fail);
        assert!(out.is_none());
    }

    #[test]
    fn ignore_fail_runs_every_op_regardless_of_failure() {
        let ops: Vec<Box<dyn Op>> = vec![
            Box::new(Echo { name: "a".into(), fail_on_process: true }),
            Box::new(Echo { name: "b".into(), fail_on_process: false }),
        ];
        let mut proc = SeqProcessor::new(ops, vec![false, false], true);
        assert!(proc.init(0, 0, &[None, None]));
        let mut out = None;
        let status = proc.process(&[], &[], &mut out);
        assert_eq!(status, Status::Succ);
        assert_eq!(out.unwrap().sender, "b");
    }

    #[test]
    fn bypassed_ops_are_excluded_from_valid_set() {
        let ops: Vec<Box<dyn Op>> = vec![
            Box::new(Echo { name: "a".into(), fail_on_process: true }),
            Box::new(Echo { name: "b".into(), fail_on_process: false }),
        ];
        let mut proc = SeqProcessor::new(ops, vec![true, false], false);
        assert!(proc.init(0, 0, &[None, None]));
        assert_eq!(proc.valid_indices(), &[1]);
        let mut out = None;
        assert_eq!(proc.process(&[], &[], &mut out), Status::Succ);
    }

    #[test]
    fn io_sanity_check_rejects_out_of_bounds_arity() {
        let ops: Vec<Box<dyn Op>> = vec![Box::new(Echo { name: "a".into(), fail_on_process: false })];
        let mut proc = SeqProcessor::new(ops, vec![false], false);
        proc.set_io_bounds(1, 1, 0, 0);
        assert!(!proc.init(0, 0, &[None]));
    }
}
