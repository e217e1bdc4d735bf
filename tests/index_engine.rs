use itertools::Itertools;

use bpt::combinatorics::{angle_count, angle_offset, scale_count, scale_offset};

/// Every subset of every size must land on its own slot, and together the
/// slots must cover the scale table exactly.
#[test]
fn scale_offsets_are_a_bijection() {
    for order in 1..=4usize {
        let mut offsets = vec![];

        for size in 1..=order {
            for subset in (0..order).combinations(size) {
                offsets.push(scale_offset(order, &subset));
            }
        }

        offsets.sort_unstable();
        assert_eq!(
            offsets,
            (0..scale_count(order)).collect::<Vec<_>>(),
            "scale table of order {} has holes or collisions",
            order
        );
    }
}

/// Every valid pair of disjoint subsets (stored orientation: the larger
/// subset leads, ties broken by the smaller leading index) must land on its
/// own slot, covering the cosine table exactly.
#[test]
fn angle_offsets_are_a_bijection() {
    for order in 1..=4usize {
        let mut offsets = vec![];

        for m1 in 1..=order {
            for first in (0..order).combinations(m1) {
                for m2 in 1..=m1 {
                    for second in (0..order)
                        .filter(|i| !first.contains(i))
                        .combinations(m2)
                    {
                        if m1 == m2 && first[0] > second[0] {
                            continue;
                        }

                        offsets.push(angle_offset(order, &first, &second));
                    }
                }
            }
        }

        offsets.sort_unstable();
        assert_eq!(
            offsets,
            (0..angle_count(order)).collect::<Vec<_>>(),
            "cosine table of order {} has holes or collisions",
            order
        );
    }
}

/// The enumeration order the buffers are filled in must agree with the
/// rank functions: subsets blocked by size, lexicographic within a block.
#[test]
fn offsets_follow_the_fill_order() {
    let order = 4;

    let mut expected = 0;
    for size in 1..=order {
        for subset in (0..order).combinations(size) {
            assert_eq!(scale_offset(order, &subset), expected);
            expected += 1;
        }
    }

    // first angle block: base pairs in row-major order
    let mut expected = 0;
    for i in 0..order {
        for j in i + 1..order {
            assert_eq!(angle_offset(order, &[i], &[j]), expected);
            expected += 1;
        }
    }
}
