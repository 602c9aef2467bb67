//! Layer lifecycle engine
//!
//! A master is composed of layers ordered leaves-first (CAN driver at the bottom, heartbeat at
//! the top). [LayerStack] drives them in lockstep: bring-up and read run forward, write and
//! teardown run in reverse, and a shared frontier records how far bring-up has progressed so
//! that cycles only ever touch provably-initialized layers.

use std::sync::Mutex;

use crate::status::{LayerReport, LayerStatus, Severity};

/// A uniquely-named participant in the lifecycle engine
///
/// Escalation is via the passed status object; implementations must tolerate the operations
/// being invoked in any order after construction.
pub trait Layer: Send {
    /// The layer's stable name
    fn name(&self) -> &str;

    /// Pull inputs, called once per cycle
    fn read(&mut self, status: &LayerStatus);
    /// Push outputs, called once per cycle
    fn write(&mut self, status: &LayerStatus);
    /// Run pending work at the bring-up frontier; may block briefly
    fn pending(&mut self, status: &LayerStatus);

    /// Populate a diagnostic report
    fn diag(&mut self, report: &mut LayerReport);

    /// Transition Uninitialized -> Ready
    fn init(&mut self, status: &LayerStatus);
    /// Reverse of init; must be callable on partially-initialized layers
    fn shutdown(&mut self, status: &LayerStatus);

    /// Stop producing side effects; safe to call multiple times
    fn halt(&mut self, status: &LayerStatus);
    /// Re-establish Ready from a halted or errored state
    fn recover(&mut self, status: &LayerStatus);
}

impl<L: Layer + ?Sized> Layer for Box<L> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn read(&mut self, status: &LayerStatus) {
        (**self).read(status)
    }
    fn write(&mut self, status: &LayerStatus) {
        (**self).write(status)
    }
    fn pending(&mut self, status: &LayerStatus) {
        (**self).pending(status)
    }
    fn diag(&mut self, report: &mut LayerReport) {
        (**self).diag(report)
    }
    fn init(&mut self, status: &LayerStatus) {
        (**self).init(status)
    }
    fn shutdown(&mut self, status: &LayerStatus) {
        (**self).shutdown(status)
    }
    fn halt(&mut self, status: &LayerStatus) {
        (**self).halt(status)
    }
    fn recover(&mut self, status: &LayerStatus) {
        (**self).recover(status)
    }
}

/// Run `op` on each layer in forward order
///
/// Short-circuits at the first layer that escalates the status above `bound`, returning its
/// index, but only if the status was within the bound to begin with; a pre-escalated status
/// never short-circuits, so a throwaway errored status visits every layer.
fn call_forward<T: Layer>(
    layers: &mut [T],
    status: &LayerStatus,
    bound: Severity,
    op: fn(&mut T, &LayerStatus),
) -> Option<usize> {
    let okay_on_start = status.bounded(bound);
    for (i, layer) in layers.iter_mut().enumerate() {
        op(layer, status);
        if okay_on_start && !status.bounded(bound) {
            return Some(i);
        }
    }
    None
}

/// Run `op` on each layer in reverse order, with the same short-circuit rule as [call_forward]
///
/// The returned index is in slice coordinates.
fn call_reverse<T: Layer>(
    layers: &mut [T],
    status: &LayerStatus,
    bound: Severity,
    op: fn(&mut T, &LayerStatus),
) -> Option<usize> {
    let okay_on_start = status.bounded(bound);
    for i in (0..layers.len()).rev() {
        op(&mut layers[i], status);
        if okay_on_start && !status.bounded(bound) {
            return Some(i);
        }
    }
    None
}

/// The bring-up frontier of a [LayerStack]
///
/// `pos` is one past the deepest layer that has been (or is being) brought up. `valid` replaces
/// the uninitialized-iterator sentinel: until the first bring-up or cycle, the frontier holds no
/// meaningful position.
#[derive(Debug, Clone, Copy)]
struct Frontier {
    pos: usize,
    valid: bool,
}

/// Ordered layer composition with strict forward/reverse traversal
///
/// Bring-up (init, recover) advances the frontier layer by layer and unwinds the brought-up
/// prefix in reverse on fault. Cycles operate only on the live prefix `[0, run_end)`; teardown
/// resets the frontier first so that concurrent cycles become no-ops.
pub struct LayerStack {
    name: String,
    layers: Vec<Box<dyn Layer>>,
    frontier: Mutex<Frontier>,
}

impl core::fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LayerStack")
            .field("name", &self.name)
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl LayerStack {
    /// Create an empty stack
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            layers: Vec::new(),
            frontier: Mutex::new(Frontier {
                pos: 0,
                valid: false,
            }),
        }
    }

    /// Append a layer; layers run in insertion order
    pub fn add(&mut self, layer: impl Layer + 'static) {
        self.layers.push(Box::new(layer));
    }

    /// Number of child layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Return true if the stack has no children
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The current frontier position, or `None` before the first bring-up
    ///
    /// On a quiescent stack this is one past the last successfully brought-up layer.
    pub fn run_end(&self) -> Option<usize> {
        let frontier = self.frontier.lock().unwrap();
        frontier.valid.then_some(frontier.pos)
    }

    fn set_frontier(&self, pos: usize) {
        let mut frontier = self.frontier.lock().unwrap();
        *frontier = Frontier { pos, valid: true };
    }

    fn bringup(
        &mut self,
        status: &LayerStatus,
        op: fn(&mut Box<dyn Layer>, &LayerStatus),
        unwind: fn(&mut Box<dyn Layer>, &LayerStatus),
    ) {
        self.set_frontier(0);
        let mut fault = None;
        for i in 0..self.layers.len() {
            self.set_frontier(i);
            op(&mut self.layers[i], status);
            if !status.bounded(Severity::Warn) {
                fault = Some(i);
                break;
            }
        }
        if let Some(i) = fault {
            // Unwind whatever was brought up, deepest-first, without touching the caller's
            // status.
            let omit = LayerStatus::new();
            call_reverse(&mut self.layers[..i], &omit, Severity::Stale, unwind);
        }
        self.set_frontier(fault.unwrap_or(self.layers.len()));
    }
}

impl Layer for LayerStack {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, status: &LayerStatus) {
        let end = {
            let mut frontier = self.frontier.lock().unwrap();
            if !frontier.valid {
                *frontier = Frontier {
                    pos: 0,
                    valid: true,
                };
            }
            frontier.pos
        };
        let fault = call_forward(&mut self.layers[..end], status, Severity::Warn, |l, s| {
            l.read(s)
        });
        if let Some(i) = fault {
            let omit = LayerStatus::new();
            // Halt everything from the top of the stack down to the failing layer, then let the
            // rest of the live prefix observe the cycle with a throwaway errored status.
            call_reverse(&mut self.layers[i..], &omit, Severity::Stale, |l, s| {
                l.halt(s)
            });
            omit.error("");
            call_forward(
                &mut self.layers[i + 1..end],
                &omit,
                Severity::Stale,
                |l, s| l.read(s),
            );
        }
    }

    fn write(&mut self, status: &LayerStatus) {
        let end = {
            let frontier = self.frontier.lock().unwrap();
            if !frontier.valid {
                return;
            }
            frontier.pos
        };
        let fault = call_reverse(&mut self.layers[..end], status, Severity::Warn, |l, s| {
            l.write(s)
        });
        if let Some(i) = fault {
            let omit = LayerStatus::new();
            call_reverse(
                &mut self.layers[i + 1..end],
                &omit,
                Severity::Stale,
                |l, s| l.halt(s),
            );
            omit.error("");
            call_reverse(&mut self.layers[..i], &omit, Severity::Stale, |l, s| {
                l.write(s)
            });
        }
    }

    fn pending(&mut self, status: &LayerStatus) {
        let end = {
            let frontier = self.frontier.lock().unwrap();
            if !frontier.valid {
                return;
            }
            frontier.pos
        };
        if end != self.layers.len() {
            self.layers[end].pending(status);
        }
    }

    fn diag(&mut self, report: &mut LayerReport) {
        let end = {
            let frontier = self.frontier.lock().unwrap();
            if !frontier.valid {
                return;
            }
            frontier.pos
        };
        for layer in &mut self.layers[..end] {
            layer.diag(report);
        }
    }

    fn init(&mut self, status: &LayerStatus) {
        self.bringup(status, |l, s| l.init(s), |l, s| l.shutdown(s));
    }

    fn recover(&mut self, status: &LayerStatus) {
        self.bringup(status, |l, s| l.recover(s), |l, s| l.halt(s));
    }

    fn shutdown(&mut self, status: &LayerStatus) {
        // Reset the frontier first so concurrent cycles become no-ops.
        self.set_frontier(0);
        call_reverse(&mut self.layers, status, Severity::Stale, |l, s| {
            l.shutdown(s)
        });
    }

    fn halt(&mut self, status: &LayerStatus) {
        call_reverse(&mut self.layers, status, Severity::Stale, |l, s| l.halt(s));
    }
}

/// Unordered layer composition
///
/// Traversal order is an implementation detail; sibling semantics are independent. On a fault
/// during read/write/init/recover every sibling is halted (shut down, for init) and the
/// operation still visits the remainder with a throwaway errored status, so all children
/// observe the cycle.
pub struct LayerGroup<T> {
    name: String,
    layers: Vec<T>,
}

impl<T: Layer> core::fmt::Debug for LayerGroup<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LayerGroup")
            .field("name", &self.name)
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl<T: Layer> LayerGroup<T> {
    /// Create an empty group
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            layers: Vec::new(),
        }
    }

    /// Add a member layer
    pub fn add(&mut self, layer: T) {
        self.layers.push(layer);
    }

    /// Number of member layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Return true if the group has no members
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Access the member layers
    pub fn layers(&self) -> &[T] {
        &self.layers
    }

    /// Mutable access to the member layers
    pub fn layers_mut(&mut self) -> &mut [T] {
        &mut self.layers
    }

    fn fault_contain(
        &mut self,
        status: &LayerStatus,
        op: fn(&mut T, &LayerStatus),
        contain: fn(&mut T, &LayerStatus),
    ) {
        if let Some(i) = call_forward(&mut self.layers, status, Severity::Warn, op) {
            let omit = LayerStatus::new();
            call_forward(&mut self.layers, &omit, Severity::Stale, contain);
            omit.error("");
            call_forward(&mut self.layers[i + 1..], &omit, Severity::Stale, op);
        }
    }
}

impl<T: Layer> Layer for LayerGroup<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, status: &LayerStatus) {
        self.fault_contain(status, |l, s| l.read(s), |l, s| l.halt(s));
    }

    fn write(&mut self, status: &LayerStatus) {
        self.fault_contain(status, |l, s| l.write(s), |l, s| l.halt(s));
    }

    fn pending(&mut self, status: &LayerStatus) {
        call_forward(&mut self.layers, status, Severity::Warn, |l, s| l.pending(s));
    }

    fn diag(&mut self, report: &mut LayerReport) {
        for layer in &mut self.layers {
            layer.diag(report);
        }
    }

    fn init(&mut self, status: &LayerStatus) {
        self.fault_contain(status, |l, s| l.init(s), |l, s| l.shutdown(s));
    }

    fn recover(&mut self, status: &LayerStatus) {
        self.fault_contain(status, |l, s| l.recover(s), |l, s| l.halt(s));
    }

    fn shutdown(&mut self, status: &LayerStatus) {
        call_forward(&mut self.layers, status, Severity::Stale, |l, s| {
            l.shutdown(s)
        });
    }

    fn halt(&mut self, status: &LayerStatus) {
        call_forward(&mut self.layers, status, Severity::Stale, |l, s| l.halt(s));
    }
}

/// A [LayerGroup] that suppresses diag entirely
///
/// Used for large per-node groups whose members would flood the report.
pub struct LayerGroupNoDiag<T>(LayerGroup<T>);

impl<T: Layer> core::fmt::Debug for LayerGroupNoDiag<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: Layer> LayerGroupNoDiag<T> {
    /// Create an empty group
    pub fn new(name: &str) -> Self {
        Self(LayerGroup::new(name))
    }

    /// Add a member layer
    pub fn add(&mut self, layer: T) {
        self.0.add(layer);
    }

    /// Number of member layers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Return true if the group has no members
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Access the member layers
    pub fn layers(&self) -> &[T] {
        self.0.layers()
    }

    /// Mutable access to the member layers
    pub fn layers_mut(&mut self) -> &mut [T] {
        self.0.layers_mut()
    }
}

impl<T: Layer> Layer for LayerGroupNoDiag<T> {
    fn name(&self) -> &str {
        self.0.name()
    }
    fn read(&mut self, status: &LayerStatus) {
        self.0.read(status)
    }
    fn write(&mut self, status: &LayerStatus) {
        self.0.write(status)
    }
    fn pending(&mut self, status: &LayerStatus) {
        self.0.pending(status)
    }
    fn diag(&mut self, _report: &mut LayerReport) {
        // no report
    }
    fn init(&mut self, status: &LayerStatus) {
        self.0.init(status)
    }
    fn shutdown(&mut self, status: &LayerStatus) {
        self.0.shutdown(status)
    }
    fn halt(&mut self, status: &LayerStatus) {
        self.0.halt(status)
    }
    fn recover(&mut self, status: &LayerStatus) {
        self.0.recover(status)
    }
}

/// Diag-only composition, used by diagnostic loggers
///
/// Not a [Layer]: members participate in reporting without being driven by the engine.
pub struct DiagGroup<T> {
    layers: Vec<T>,
}

impl<T: Layer> Default for DiagGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Layer> DiagGroup<T> {
    /// Create an empty group
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Add a member
    pub fn add(&mut self, layer: T) {
        self.layers.push(layer);
    }

    /// Populate `report` from every member
    pub fn diag(&mut self, report: &mut LayerReport) {
        for layer in &mut self.layers {
            layer.diag(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every operation invoked on it, and can be told to escalate on specific ops.
    struct TestLayer {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_on: Option<(&'static str, Severity)>,
    }

    impl TestLayer {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                log: log.clone(),
                fail_on: None,
            }
        }

        fn failing(name: &str, log: &Arc<Mutex<Vec<String>>>, op: &'static str) -> Self {
            Self {
                name: name.to_string(),
                log: log.clone(),
                fail_on: Some((op, Severity::Error)),
            }
        }

        fn record(&self, op: &str, status: &LayerStatus) {
            self.log.lock().unwrap().push(format!("{}.{op}", self.name));
            if let Some((fail_op, severity)) = self.fail_on {
                if fail_op == op {
                    match severity {
                        Severity::Warn => status.warn("boom"),
                        _ => status.error("boom"),
                    }
                }
            }
        }
    }

    impl Layer for TestLayer {
        fn name(&self) -> &str {
            &self.name
        }
        fn read(&mut self, status: &LayerStatus) {
            self.record("read", status);
        }
        fn write(&mut self, status: &LayerStatus) {
            self.record("write", status);
        }
        fn pending(&mut self, status: &LayerStatus) {
            self.record("pending", status);
        }
        fn diag(&mut self, report: &mut LayerReport) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}.diag", self.name));
            report.add("layer", &self.name);
        }
        fn init(&mut self, status: &LayerStatus) {
            self.record("init", status);
        }
        fn shutdown(&mut self, status: &LayerStatus) {
            self.record("shutdown", status);
        }
        fn halt(&mut self, status: &LayerStatus) {
            self.record("halt", status);
        }
        fn recover(&mut self, status: &LayerStatus) {
            self.record("recover", status);
        }
    }

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn taken(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[test]
    fn test_empty_stack_lifecycle() {
        let mut stack = LayerStack::new("root");
        let status = LayerStatus::new();

        stack.init(&status);
        assert_eq!(status.severity(), Severity::Ok);
        assert_eq!(stack.run_end(), Some(0));

        stack.read(&status);
        stack.write(&status);
        stack.shutdown(&status);
        assert_eq!(status.severity(), Severity::Ok);
    }

    #[test]
    fn test_init_success_order() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(TestLayer::new("b", &log));
        stack.add(TestLayer::new("c", &log));

        let status = LayerStatus::new();
        stack.init(&status);
        assert_eq!(status.severity(), Severity::Ok);
        assert_eq!(stack.run_end(), Some(3));
        assert_eq!(taken(&log), ["a.init", "b.init", "c.init"]);
    }

    #[test]
    fn test_init_fault_unwinds_reverse() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(TestLayer::failing("b", &log, "init"));
        stack.add(TestLayer::new("c", &log));

        let status = LayerStatus::new();
        stack.init(&status);
        assert_eq!(status.severity(), Severity::Error);
        assert!(status.reason().contains("boom"));
        // c is never initialized, a is shut down exactly once, frontier stays at b
        assert_eq!(taken(&log), ["a.init", "b.init", "a.shutdown"]);
        assert_eq!(stack.run_end(), Some(1));
    }

    #[test]
    fn test_recover_fault_halts_prefix() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(TestLayer::failing("b", &log, "recover"));

        let status = LayerStatus::new();
        stack.recover(&status);
        assert_eq!(status.severity(), Severity::Error);
        assert_eq!(taken(&log), ["a.recover", "b.recover", "a.halt"]);
    }

    #[test]
    fn test_write_is_reverse_of_read() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(TestLayer::new("b", &log));
        stack.add(TestLayer::new("c", &log));

        let status = LayerStatus::new();
        stack.init(&status);
        taken(&log);

        stack.read(&status);
        assert_eq!(taken(&log), ["a.read", "b.read", "c.read"]);

        stack.write(&status);
        assert_eq!(taken(&log), ["c.write", "b.write", "a.write"]);
    }

    #[test]
    fn test_cycles_restricted_to_live_prefix() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(TestLayer::failing("b", &log, "init"));
        stack.add(TestLayer::new("c", &log));

        let status = LayerStatus::new();
        stack.init(&status);
        taken(&log);

        // Only the brought-up prefix [a] is cycled
        let cycle = LayerStatus::new();
        stack.read(&cycle);
        stack.write(&cycle);
        assert_eq!(taken(&log), ["a.read", "a.write"]);
        assert_eq!(cycle.severity(), Severity::Ok);
    }

    #[test]
    fn test_read_fault_halts_and_visits_tail() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(TestLayer::failing("b", &log, "read"));
        stack.add(TestLayer::new("c", &log));
        stack.add(TestLayer::new("d", &log));

        let status = LayerStatus::new();
        stack.init(&status);
        taken(&log);

        stack.read(&status);
        assert_eq!(status.severity(), Severity::Error);
        // b faults; everything from the top down to b is halted, then the rest of the live
        // prefix still observes the cycle
        assert_eq!(
            taken(&log),
            ["a.read", "b.read", "d.halt", "c.halt", "b.halt", "c.read", "d.read"]
        );
    }

    #[test]
    fn test_write_fault_mirrored() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(TestLayer::failing("b", &log, "write"));
        stack.add(TestLayer::new("c", &log));

        let status = LayerStatus::new();
        stack.init(&status);
        taken(&log);

        stack.write(&status);
        assert_eq!(status.severity(), Severity::Error);
        assert_eq!(
            taken(&log),
            ["c.write", "b.write", "c.halt", "a.write"]
        );
    }

    #[test]
    fn test_pending_hits_frontier_only() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(TestLayer::failing("b", &log, "init"));
        stack.add(TestLayer::new("c", &log));

        let status = LayerStatus::new();
        stack.init(&status);
        taken(&log);

        stack.pending(&status);
        assert_eq!(taken(&log), ["b.pending"]);
    }

    #[test]
    fn test_pending_noop_when_fully_up() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));

        let status = LayerStatus::new();
        stack.init(&status);
        taken(&log);

        stack.pending(&status);
        assert!(taken(&log).is_empty());
    }

    #[test]
    fn test_shutdown_reverse_all() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(TestLayer::new("b", &log));

        let status = LayerStatus::new();
        stack.init(&status);
        taken(&log);

        stack.shutdown(&status);
        assert_eq!(taken(&log), ["b.shutdown", "a.shutdown"]);
        // Frontier reset: subsequent cycles are no-ops
        stack.read(&status);
        stack.write(&status);
        assert!(taken(&log).is_empty());
    }

    #[test]
    fn test_diag_never_short_circuits() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(TestLayer::new("b", &log));

        let status = LayerStatus::new();
        stack.init(&status);
        taken(&log);

        let mut report = LayerReport::new();
        report.error("pre-existing");
        stack.diag(&mut report);
        assert_eq!(taken(&log), ["a.diag", "b.diag"]);
        assert_eq!(report.values().len(), 2);
    }

    #[test]
    fn test_diag_before_bringup_is_noop() {
        let log = log();
        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));

        let mut report = LayerReport::new();
        stack.diag(&mut report);
        assert!(taken(&log).is_empty());
    }

    #[test]
    fn test_group_read_fault_halts_all_siblings() {
        let log = log();
        let mut group: LayerGroup<TestLayer> = LayerGroup::new("nodes");
        group.add(TestLayer::new("a", &log));
        group.add(TestLayer::failing("b", &log, "read"));
        group.add(TestLayer::new("c", &log));

        let status = LayerStatus::new();
        group.read(&status);
        assert_eq!(status.severity(), Severity::Error);
        assert_eq!(
            taken(&log),
            ["a.read", "b.read", "a.halt", "b.halt", "c.halt", "c.read"]
        );
    }

    #[test]
    fn test_group_init_fault_shuts_down_all() {
        let log = log();
        let mut group: LayerGroup<TestLayer> = LayerGroup::new("nodes");
        group.add(TestLayer::failing("a", &log, "init"));
        group.add(TestLayer::new("b", &log));

        let status = LayerStatus::new();
        group.init(&status);
        assert_eq!(status.severity(), Severity::Error);
        assert_eq!(
            taken(&log),
            ["a.init", "a.shutdown", "b.shutdown", "b.init"]
        );
    }

    #[test]
    fn test_group_no_diag() {
        let log = log();
        let mut group: LayerGroupNoDiag<TestLayer> = LayerGroupNoDiag::new("nodes");
        group.add(TestLayer::new("a", &log));

        let mut report = LayerReport::new();
        group.diag(&mut report);
        assert!(taken(&log).is_empty());
        assert!(report.values().is_empty());
    }

    #[test]
    fn test_diag_group_visits_all_members() {
        let log = log();
        let mut group: DiagGroup<TestLayer> = DiagGroup::new();
        group.add(TestLayer::new("a", &log));
        group.add(TestLayer::new("b", &log));

        let mut report = LayerReport::new();
        group.diag(&mut report);
        assert_eq!(taken(&log), ["a.diag", "b.diag"]);
        assert_eq!(report.values().len(), 2);
    }

    #[test]
    fn test_nested_stack() {
        let log = log();
        let mut inner = LayerStack::new("inner");
        inner.add(TestLayer::new("x", &log));
        inner.add(TestLayer::new("y", &log));

        let mut stack = LayerStack::new("root");
        stack.add(TestLayer::new("a", &log));
        stack.add(inner);

        let status = LayerStatus::new();
        stack.init(&status);
        assert_eq!(status.severity(), Severity::Ok);
        assert_eq!(taken(&log), ["a.init", "x.init", "y.init"]);

        stack.write(&status);
        assert_eq!(taken(&log), ["y.write", "x.write", "a.write"]);
    }
}
