//! Direct output of evaluated points.
//!
//! When enabled, the dispatcher records one history line per blackbox
//! evaluation and one solution line per new best feasible point:
//!
//! ```text
//! HISTORY #<tag> ctx=<id> x=[x1,x2,...] f=<val> h=<val> status=<STATUS>
//! SOLUTION #<tag> ctx=<id> x=[x1,x2,...] f=<val>
//! ```

use std::fmt::Write as FmtWrite;
use std::io::Write;

use parking_lot::Mutex;

use crate::queue::QueuedRequest;

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{}", v),
        None => "-".to_string(),
    }
}

fn fmt_coords(x: &[f64]) -> String {
    let parts: Vec<String> = x.iter().map(|xi| format!("{}", xi)).collect();
    format!("[{}]", parts.join(","))
}

/// Thread-safe line buffers for history and solutions.
#[derive(Debug)]
pub struct DirectOutput {
    history: Mutex<String>,
    solutions: Mutex<String>,
}

impl DirectOutput {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(String::with_capacity(16 * 1024)),
            solutions: Mutex::new(String::new()),
        }
    }

    pub fn write_history(&self, req: &QueuedRequest) {
        let rec = req.point().record(req.eval_type());
        let mut buf = self.history.lock();
        let _ = writeln!(
            buf,
            "HISTORY #{} ctx={} x={} f={} h={} status={}",
            req.point().tag(),
            req.context().value(),
            fmt_coords(req.point().coords()),
            fmt_opt(rec.f),
            fmt_opt(rec.h),
            rec.status
        );
    }

    pub fn write_solution(&self, req: &QueuedRequest) {
        let mut buf = self.solutions.lock();
        let _ = writeln!(
            buf,
            "SOLUTION #{} ctx={} x={} f={}",
            req.point().tag(),
            req.context().value(),
            fmt_coords(req.point().coords()),
            fmt_opt(req.point().f(req.eval_type()))
        );
    }

    pub fn history_lines(&self) -> Vec<String> {
        self.history.lock().lines().map(|s| s.to_string()).collect()
    }

    pub fn solution_lines(&self) -> Vec<String> {
        self.solutions.lock().lines().map(|s| s.to_string()).collect()
    }

    /// Writes both buffers, history first.
    pub fn write_to<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        out.write_all(self.history.lock().as_bytes())?;
        out.write_all(self.solutions.lock().as_bytes())
    }

    pub fn clear(&self) {
        self.history.lock().clear();
        self.solutions.lock().clear();
    }
}

impl Default for DirectOutput {
    fn default() -> Self {
        Self::new()
    }
}
