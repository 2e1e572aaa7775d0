use hdlreg_compare::vcd::{diff, parse};
use hdlreg_compare::{compare_files, ComparisonKind, ComparisonResult, Normalization};
use proptest::prelude::*;

const SIGNALS: [(&str, &str); 4] = [("!", "clk"), ("\"", "rst"), ("#", "en"), ("$", "valid")];

fn header(ids: [&str; 4]) -> String {
    let mut out = String::from("$version test $end\n$timescale 1ns $end\n$scope module top $end\n");
    for (id, (_, name)) in ids.iter().zip(SIGNALS.iter()) {
        out.push_str(&format!("$var wire 1 {id} {name} $end\n"));
    }
    out.push_str("$upscope $end\n$enddefinitions $end\n");
    out
}

type Section = (u64, Vec<(usize, char)>);

fn render(ids: [&str; 4], sections: &[Section]) -> String {
    let mut out = header(ids);
    for (time, changes) in sections {
        out.push_str(&format!("#{time}\n"));
        for (sig, value) in changes {
            out.push_str(&format!("{value}{}\n", ids[*sig]));
        }
    }
    out
}

fn default_ids() -> [&'static str; 4] {
    [SIGNALS[0].0, SIGNALS[1].0, SIGNALS[2].0, SIGNALS[3].0]
}

/// Strictly increasing timestamps, each with at most one change per signal.
fn sections() -> impl Strategy<Value = Vec<Section>> {
    prop::collection::vec(
        (
            1u64..50,
            prop::sample::subsequence(vec![0usize, 1, 2, 3], 1..=4),
            prop::collection::vec(prop::sample::select(vec!['0', '1', 'x', 'z']), 4),
        ),
        1..8,
    )
    .prop_map(|raw| {
        let mut time = 0;
        raw.into_iter()
            .map(|(step, sigs, values)| {
                time += step;
                let changes = sigs.into_iter().map(|s| (s, values[s])).collect();
                (time, changes)
            })
            .collect()
    })
}

fn shuffled_within_timestamps(sections: Vec<Section>) -> impl Strategy<Value = Vec<Section>> {
    sections
        .into_iter()
        .map(|(time, changes)| Just(changes).prop_shuffle().prop_map(move |c| (time, c)))
        .collect::<Vec<_>>()
}

proptest! {
    #[test]
    fn reordering_within_a_timestamp_is_equivalent(
        (original, shuffled) in sections().prop_flat_map(|s| (Just(s.clone()), shuffled_within_timestamps(s)))
    ) {
        let golden = parse(&render(default_ids(), &original)).expect("golden");
        let actual = parse(&render(default_ids(), &shuffled)).expect("actual");
        prop_assert_eq!(diff(&actual, &golden), None);
    }

    #[test]
    fn changing_one_value_is_a_mismatch(
        original in sections(),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut changed = original.clone();
        let flat: Vec<(usize, usize)> = changed
            .iter()
            .enumerate()
            .flat_map(|(si, (_, c))| (0..c.len()).map(move |ci| (si, ci)))
            .collect();
        let (si, ci) = flat[pick.index(flat.len())];
        let value = &mut changed[si].1[ci].1;
        *value = if *value == '1' { '0' } else { '1' };

        let golden = parse(&render(default_ids(), &original)).expect("golden");
        let actual = parse(&render(default_ids(), &changed)).expect("actual");
        prop_assert!(diff(&actual, &golden).is_some());
    }

    #[test]
    fn shifting_a_timestamp_is_a_mismatch(original in sections(), bump in 1u64..5) {
        let mut changed = original.clone();
        if let Some(last) = changed.last_mut() {
            last.0 += bump;
        }
        let golden = parse(&render(default_ids(), &original)).expect("golden");
        let actual = parse(&render(default_ids(), &changed)).expect("actual");
        prop_assert!(diff(&actual, &golden).is_some());
    }

    #[test]
    fn identifier_codes_are_not_significant(original in sections()) {
        let golden = parse(&render(default_ids(), &original)).expect("golden");
        let actual = parse(&render(["a", "bb", "c3", "%"], &original)).expect("actual");
        prop_assert_eq!(diff(&actual, &golden), None);
    }
}

#[test]
fn swapping_changes_across_timestamps_is_a_mismatch() {
    let golden = render(default_ids(), &[(1, vec![(0, '1')]), (2, vec![(1, '1')])]);
    let actual = render(default_ids(), &[(1, vec![(1, '1')]), (2, vec![(0, '1')])]);
    let summary = diff(&parse(&actual).expect("actual"), &parse(&golden).expect("golden"))
        .expect("must differ");
    assert!(summary.contains("at #1"), "{summary}");
}

#[test]
fn renaming_a_scope_is_a_mismatch() {
    let golden = render(default_ids(), &[(1, vec![(0, '1')])]);
    let actual = golden.replace("$scope module top", "$scope module dut");
    let summary = diff(&parse(&actual).expect("actual"), &parse(&golden).expect("golden"))
        .expect("must differ");
    assert!(summary.starts_with("hierarchy differs"), "{summary}");
    assert!(summary.contains("top.clk"), "{summary}");
}

#[test]
fn changing_a_scope_kind_is_a_mismatch() {
    let golden = render(default_ids(), &[(1, vec![(0, '1')])]);
    let actual = golden.replace("$scope module top", "$scope task top");
    let summary = diff(&parse(&actual).expect("actual"), &parse(&golden).expect("golden"))
        .expect("must differ");
    assert!(summary.starts_with("hierarchy differs"), "{summary}");
    assert!(summary.contains("$scope task top"), "{summary}");
}

#[test]
fn header_metadata_is_ignored() {
    let golden = render(default_ids(), &[(1, vec![(0, '1')])]);
    let actual = golden.replace(
        "$version test $end",
        "$date Tue Oct 13 2026 $end\n$version Verilator 5.0 $end\n$comment generated $end",
    );
    assert_eq!(
        diff(&parse(&actual).expect("actual"), &parse(&golden).expect("golden")),
        None
    );
}

#[test]
fn unparseable_actual_trace_is_a_mismatch_not_an_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let golden = tmp.path().join("t_trace.out");
    let actual = tmp.path().join("simx.vcd");
    std::fs::write(&golden, render(default_ids(), &[(1, vec![(0, '1')])])).expect("write");
    std::fs::write(&actual, "$scope module top $end\n#1\n").expect("write");

    let result = compare_files(ComparisonKind::Trace, &actual, &golden, &Normalization::default())
        .expect("compare");
    let ComparisonResult::Mismatch { summary } = result else {
        panic!("expected mismatch, got {result:?}");
    };
    assert!(summary.starts_with("actual trace does not parse"), "{summary}");
}
