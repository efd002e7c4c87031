//! The implementation of the `RAPASS_LOG_IR` environment variable.
//!
//! `RAPASS_LOG_IR` must be of the form `<path|->:<phase>,...`, where `-` means "log to stderr"
//! and the phases select which IR snapshots are written out.

use std::{collections::HashSet, env, error::Error, fs::File, io::Write, sync::LazyLock};

#[derive(Eq, Hash, PartialEq)]
pub(crate) enum IRPhase {
    /// The IR after the fetch stage, before any node is removed.
    PreRa,
    /// The IR after liveness analysis, annotated with per-node live sets.
    Liveness,
}

impl IRPhase {
    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s {
            "ra-pre" => Ok(Self::PreRa),
            "ra-liveness" => Ok(Self::Liveness),
            _ => Err(format!("Invalid RAPASS_LOG_IR phase: {s}").into()),
        }
    }
}

static LOG_IR: LazyLock<Option<(String, HashSet<IRPhase>)>> = LazyLock::new(|| {
    if let Ok(x) = env::var("RAPASS_LOG_IR") {
        match x.split(':').collect::<Vec<_>>().as_slice() {
            [p, phases] => {
                let mut log_phases = HashSet::new();
                for phase in phases.split(',') {
                    log_phases.insert(IRPhase::from_str(phase).unwrap());
                }
                Some((p.to_string(), log_phases))
            }
            _ => panic!("RAPASS_LOG_IR must be of the format '<path|->:phase_1,...,phase_n'"),
        }
    } else {
        None
    }
});

pub(crate) fn should_log_ir(phase: IRPhase) -> bool {
    if let Some(true) = LOG_IR.as_ref().map(|(_, phases)| phases.contains(&phase)) {
        return true;
    }
    false
}

pub(crate) fn log_ir(s: &str) {
    match LOG_IR.as_ref().map(|(p, _)| p.as_str()) {
        Some("-") => eprintln!("{}", s),
        Some(x) => {
            File::options()
                .append(true)
                .open(x)
                .map(|mut x| x.write(s.as_bytes()))
                .ok();
        }
        None => (),
    }
}
