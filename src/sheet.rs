//! Ordered rule ledger of one configuration.
//!
//! Rules live in fixed groups so that cascade order does not depend on which component
//! compiled first: themes before globals, plain atomic rules before nested-selector
//! rules, and conditional (at-rule wrapped) rules last, ranked by breakpoint.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SheetGroup {
    Import,
    Themed,
    Global,
    Atomic,
    Nested,
    Conditional,
}

impl SheetGroup {
    pub const ALL: [SheetGroup; 6] = [
        SheetGroup::Import,
        SheetGroup::Themed,
        SheetGroup::Global,
        SheetGroup::Atomic,
        SheetGroup::Nested,
        SheetGroup::Conditional,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Receives every new rule at the absolute index it takes in the sheet text, e.g. to
/// mirror the sheet into a CSSOM `insertRule` call.
///
/// Rules are delivered in insertion order after the engine has released its sheet lock,
/// so an injector may call back into the engine. Rules compiled from inside the callback
/// are delivered once it returns.
pub trait SheetInjector: Send {
    fn insert_rule(&mut self, css: &str, index: usize);
}

#[derive(Debug, Clone)]
struct SheetRule {
    rank: usize,
    css: String,
}

#[derive(Debug, Default)]
pub struct Sheet {
    groups: [Vec<SheetRule>; 6],
    seen: HashSet<u64>,
    /// `(css, index)` of rules not yet handed to an injector; only kept when mirrored.
    pending: Option<VecDeque<(String, usize)>>,
}

impl Sheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sheet that queues every new rule for [`Sheet::next_pending`].
    pub fn mirrored() -> Self {
        Self {
            pending: Some(VecDeque::new()),
            ..Self::default()
        }
    }

    /// Inserts `css` unless a rule with `hash` is already present. Returns the absolute
    /// index of the new rule.
    ///
    /// Rules of a group are ordered by `rank`, insertion order among equal ranks.
    pub fn insert(&mut self, group: SheetGroup, rank: usize, hash: u64, css: String) -> Option<usize> {
        if !self.seen.insert(hash) {
            return None;
        }
        let rules = &mut self.groups[group.index()];
        let position = rules.partition_point(|rule| rule.rank <= rank);
        let offset = self.groups[..group.index()]
            .iter()
            .map(Vec::len)
            .sum::<usize>();
        let index = offset + position;
        if let Some(pending) = self.pending.as_mut() {
            pending.push_back((css.clone(), index));
        }
        self.groups[group.index()].insert(position, SheetRule { rank, css });
        Some(index)
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.seen.contains(&hash)
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn group_len(&self, group: SheetGroup) -> usize {
        self.groups[group.index()].len()
    }

    /// Rules in sheet order.
    pub fn rules(&self) -> impl Iterator<Item = (SheetGroup, &str)> {
        SheetGroup::ALL.into_iter().flat_map(move |group| {
            self.groups[group.index()]
                .iter()
                .map(move |rule| (group, rule.css.as_str()))
        })
    }

    pub fn get_text(&self) -> String {
        self.rules().map(|(_, css)| css).collect()
    }

    /// Oldest rule not yet mirrored. Indices are valid once every earlier pending rule
    /// has been applied.
    pub fn next_pending(&mut self) -> Option<(String, usize)> {
        self.pending.as_mut()?.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|pending| !pending.is_empty())
    }
}
