// SPDX-License-Identifier: Apache-2.0
// Copyright Authors of bpfman

//! The total order the dispatcher composer sorts component programs by
//! before assigning them slots.
//!
//! Grounded on `original_source/lib/libxdp/libxdp.c`'s `cmp_xdp_programs()`:
//! the same six-key lexicographic comparison, in the same order.

use std::cmp::Ordering;

use crate::program::ProgramHandle;

/// Compares two handles the way the dispatcher composer orders them:
/// lower numeric priority first, then name, then loaded-before-unloaded,
/// then smaller object size, then content tag, then earlier load time.
///
/// The first two keys are expected to distinguish almost every real input;
/// the rest exist purely so repeated runs over the same set produce the
/// same sequence.
pub(crate) fn compare(a: &ProgramHandle, b: &ProgramHandle) -> Ordering {
    a.priority()
        .cmp(&b.priority())
        .then_with(|| a.name().cmp(b.name()))
        .then_with(|| b.is_loaded().cmp(&a.is_loaded()))
        .then_with(|| a.object_size().cmp(&b.object_size()))
        .then_with(|| a.content_tag().cmp(b.content_tag()))
        .then_with(|| a.load_time().cmp(&b.load_time()))
}

/// Sorts `handles` in place by [`compare`].
pub(crate) fn sort(handles: &mut [ProgramHandle]) {
    handles.sort_by(compare);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramHandle;
    use std::rc::Rc;

    fn handle(name: &str, priority: u32) -> ProgramHandle {
        let source = Rc::new(crate::program::SourceObject::parse(&[]).unwrap());
        let mut h = ProgramHandle::from_source_object(&source, name.as_bytes().to_vec()).unwrap();
        h.set_priority(priority);
        h
    }

    #[test]
    fn sorts_by_priority_then_name() {
        let mut handles = vec![handle("b", 10), handle("a", 10), handle("c", 5)];
        sort(&mut handles);
        let names: Vec<&str> = handles.iter().map(|h| h.name_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn order_is_stable_across_shuffled_input() {
        let base = vec![handle("alpha", 3), handle("beta", 3), handle("gamma", 1)];
        let mut shuffled = vec![base[1].name(), base[0].name(), base[2].name()]
            .into_iter()
            .map(|n| {
                let h = handle(std::str::from_utf8(n).unwrap(), 0);
                h
            })
            .collect::<Vec<_>>();
        // Re-derive priorities to mirror `base` regardless of construction order.
        for h in shuffled.iter_mut() {
            let p = match h.name_str() {
                "gamma" => 1,
                _ => 3,
            };
            h.set_priority(p);
        }
        let mut expected = base;
        sort(&mut expected);
        sort(&mut shuffled);
        let expected_names: Vec<&str> = expected.iter().map(|h| h.name_str()).collect();
        let shuffled_names: Vec<&str> = shuffled.iter().map(|h| h.name_str()).collect();
        assert_eq!(expected_names, shuffled_names);
    }
}
