//! A declarative scenario (§4.H): `{name, editors, argv, expectedErr, expectedSeq}`.

use std::sync::Arc;

use rbmk_observe::Msg;
use rbmk_sim::Simulator;

/// One step in `expectedSeq`: either a concrete event or a stand-in for
/// zero-or-more of the "chatty" kinds (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqItem {
    Exact(Msg),
    /// Zero or more of {read, write, close} events, consumed greedily up to
    /// the next concrete item.
    Wildcard,
}

/// A composable mutation applied to the simulator before a scenario runs
/// (e.g. "censor DNS like Iran for domain X" installs a forging filter).
pub type Editor = Arc<dyn Fn(&Simulator) + Send + Sync>;

/// `argv` drives the measurement task the same way `rbmk dig`'s own
/// argument vector would; `expected_err` is the abstract error class
/// (§7, e.g. `"NoName"`) or `None` for success; `expected_seq` is matched
/// against the observed events with a greedy wildcard matcher.
#[derive(Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub editors: Vec<Editor>,
    pub argv: Vec<String>,
    pub expected_err: Option<&'static str>,
    pub expected_seq: Vec<SeqItem>,
}

impl Scenario {
    pub fn new(name: &'static str, argv: &[&str], expected_seq: Vec<SeqItem>) -> Self {
        Self {
            name,
            editors: Vec::new(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            expected_err: None,
            expected_seq,
        }
    }

    pub fn with_editor(mut self, editor: Editor) -> Self {
        self.editors.push(editor);
        self
    }

    pub fn with_expected_err(mut self, class: &'static str) -> Self {
        self.expected_err = Some(class);
        self
    }
}
