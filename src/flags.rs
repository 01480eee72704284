//! C6: a three-valued abstract interpreter over boolean flag variables,
//! used by the assembler to elide runtime guards it can prove redundant.
//!
//! Each flag sits in one of three states with respect to a given tracker:
//! known true, known false, or unknown. Tracking is purely a static
//! approximation of which guard checks are unreachable or unconditionally
//! satisfied along the path taken to reach a block; it never affects the
//! emitted program's runtime behavior, only whether a guard is emitted.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::instruction::Name;

/// An immutable snapshot of what is statically known about every flag along
/// one path through the block graph.
///
/// Cloning is cheap: the flag universe is shared via `Arc`, and the
/// true/false sets are small (a handful of flags per timestepper method).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagTracker {
    universe: Arc<BTreeSet<Name>>,
    must_be_true: BTreeSet<Name>,
    must_be_false: BTreeSet<Name>,
}

impl FlagTracker {
    /// A tracker over `flags` with nothing yet known.
    pub fn new(flags: impl IntoIterator<Item = Name>) -> FlagTracker {
        FlagTracker {
            universe: Arc::new(flags.into_iter().collect()),
            must_be_true: BTreeSet::new(),
            must_be_false: BTreeSet::new(),
        }
    }

    /// A tracker over `flags` where every flag is already known false, the
    /// state after the entry block's flag-zeroing statements have run.
    pub fn all_false(flags: impl IntoIterator<Item = Name>) -> FlagTracker {
        let universe: BTreeSet<Name> = flags.into_iter().collect();
        FlagTracker {
            must_be_false: universe.clone(),
            universe: Arc::new(universe),
            must_be_true: BTreeSet::new(),
        }
    }

    /// Returns a tracker identical to `self` except that `flag` is now known
    /// true. Overwrites any prior knowledge that `flag` was false.
    pub fn set_true(&self, flag: &Name) -> FlagTracker {
        let mut next = self.clone();
        next.must_be_false.remove(flag);
        next.must_be_true.insert(flag.clone());
        next
    }

    /// Returns a tracker identical to `self` except that `flag` is now known
    /// false. Overwrites any prior knowledge that `flag` was true.
    pub fn set_false(&self, flag: &Name) -> FlagTracker {
        let mut next = self.clone();
        next.must_be_true.remove(flag);
        next.must_be_false.insert(flag.clone());
        next
    }

    pub fn is_definitely_true(&self, flag: &Name) -> bool {
        self.must_be_true.contains(flag)
    }

    pub fn is_definitely_false(&self, flag: &Name) -> bool {
        self.must_be_false.contains(flag)
    }

    /// Whether a runtime check of `flag` is still needed before entering its
    /// block's body.
    ///
    /// Callers only reach this question once they already know `flag` is
    /// not definitely true (that case is a full lazy skip, handled
    /// upstream). The remaining case this distinguishes: if `flag` is
    /// definitely false, execution has certainly not reached the block yet,
    /// so the body can run unconditionally with no guard at all.
    pub fn needs_guard(&self, flag: &Name) -> bool {
        !self.is_definitely_false(flag)
    }

    /// The meet (greatest lower bound) of two trackers describing two
    /// incoming paths that converge: a flag is known true after the meet
    /// only if both paths agree it is true, and known false only if both
    /// agree it is false. Anything the two paths disagree on, or that only
    /// one of them knows, becomes unknown again.
    ///
    /// Panics in debug builds if the two trackers were not built over the
    /// same flag universe; merging unrelated trackers is a bug in the
    /// caller, not a malformed input.
    pub fn meet(&self, other: &FlagTracker) -> FlagTracker {
        debug_assert!(
            Arc::ptr_eq(&self.universe, &other.universe) || self.universe == other.universe,
            "merged flag trackers must share a flag universe"
        );
        FlagTracker {
            universe: self.universe.clone(),
            must_be_true: self
                .must_be_true
                .intersection(&other.must_be_true)
                .cloned()
                .collect(),
            must_be_false: self
                .must_be_false
                .intersection(&other.must_be_false)
                .cloned()
                .collect(),
        }
    }

    pub fn flags(&self) -> impl Iterator<Item = &Name> {
        self.universe.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(names: &[&str]) -> FlagTracker {
        FlagTracker::new(names.iter().map(|n| Name::from(*n)))
    }

    #[test]
    fn fresh_tracker_knows_nothing_and_needs_a_guard() {
        let t = flags(&["a", "b"]);
        let a: Name = "a".into();
        assert!(!t.is_definitely_true(&a));
        assert!(!t.is_definitely_false(&a));
        assert!(t.needs_guard(&a));
    }

    #[test]
    fn set_true_is_visible_and_does_not_mutate_the_original() {
        let t0 = flags(&["a"]);
        let a: Name = "a".into();
        let t1 = t0.set_true(&a);
        assert!(t1.is_definitely_true(&a));
        assert!(!t0.is_definitely_true(&a));
    }

    #[test]
    fn set_true_then_set_false_overwrites() {
        let a: Name = "a".into();
        let t = flags(&["a"]).set_true(&a).set_false(&a);
        assert!(t.is_definitely_false(&a));
        assert!(!t.is_definitely_true(&a));
    }

    #[test]
    fn meet_of_agreeing_paths_keeps_the_knowledge() {
        let a: Name = "a".into();
        let left = flags(&["a", "b"]).set_true(&a);
        let right = flags(&["a", "b"]).set_true(&a);
        let merged = left.meet(&right);
        assert!(merged.is_definitely_true(&a));
    }

    #[test]
    fn meet_of_disagreeing_paths_forgets_the_flag() {
        let a: Name = "a".into();
        let left = flags(&["a"]).set_true(&a);
        let right = flags(&["a"]).set_false(&a);
        let merged = left.meet(&right);
        assert!(!merged.is_definitely_true(&a));
        assert!(!merged.is_definitely_false(&a));
    }

    #[test]
    fn all_false_knows_every_flag_is_false_and_needs_no_guard() {
        let t = FlagTracker::all_false(["a".into(), "b".into()]);
        let a: Name = "a".into();
        assert!(t.is_definitely_false(&a));
        assert!(!t.is_definitely_true(&a));
        assert!(!t.needs_guard(&a));
    }

    #[test]
    fn meet_is_monotone_with_respect_to_knowledge() {
        // Merging a path that knows `a` with one that knows nothing about
        // `a` must not produce knowledge the second path didn't have.
        let a: Name = "a".into();
        let knows = flags(&["a"]).set_true(&a);
        let unknown = flags(&["a"]);
        let merged = knows.meet(&unknown);
        assert!(!merged.is_definitely_true(&a));
    }
}
