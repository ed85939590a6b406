// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print rule conditions and flow matches in a human-friendly manner.

use crate::cfg::ConditionSet;
use crate::engine::condition::Condition;
use crate::engine::flow_match::FlowMatch;
use std::collections::VecDeque;
use std::io::Write;
use std::string::String;
use tabwriter::TabWriter;

/// Print the header for the [`print_condition()`] output.
pub fn print_condition_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "NAME\tINV\tCLAUSES")
}

/// Print a single [`Condition`], one clause per line.
pub fn print_condition(
    t: &mut impl Write,
    name: &str,
    cond: &Condition,
) -> std::io::Result<()> {
    let mut clauses = cond.clauses().into_iter().collect::<VecDeque<String>>();
    let first = clauses.pop_front().unwrap_or_else(|| String::from("*"));
    let inv = if cond.conjunction_inv { "yes" } else { "no" };

    writeln!(t, "{name}\t{inv}\t{first}")?;

    let multi = !clauses.is_empty();
    while let Some(clause) = clauses.pop_front() {
        writeln!(t, "\t\t{clause}")?;
    }

    // Separate multi-line conditions so it's easier to discern where
    // one ends and the next begins.
    if multi {
        writeln!(t, "\t\t")?;
    }

    Ok(())
}

/// Print a [`Condition`] into a given writer.
pub fn print_condition_into(
    writer: &mut impl Write,
    name: &str,
    cond: &Condition,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    print_condition_header(&mut t)?;
    print_condition(&mut t, name, cond)?;
    t.flush()
}

/// Print a [`ConditionSet`].
pub fn print_condition_set(set: &ConditionSet) -> std::io::Result<()> {
    print_condition_set_into(&mut std::io::stdout(), set)
}

/// Print a [`ConditionSet`] into a given writer.
pub fn print_condition_set_into(
    writer: &mut impl Write,
    set: &ConditionSet,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    print_condition_header(&mut t)?;
    for (name, cond) in set.iter() {
        print_condition(&mut t, name, cond)?;
    }
    t.flush()
}

/// Print a [`FlowMatch`] into a given writer, one key per line.
pub fn print_flow_match_into(
    writer: &mut impl Write,
    fm: &FlowMatch,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(
        t,
        "Flow Match ({} keys, user space only: {}, crc32: 0x{:08x})",
        fm.len(),
        fm.is_user_space_only(),
        fm.crc32(),
    )?;
    write_hr(&mut t)?;
    writeln!(t, "IDX\tSW ONLY\tKEY")?;
    for (i, key) in fm.keys().iter().enumerate() {
        let sw = if key.is_user_space_only() { "yes" } else { "no" };
        writeln!(t, "{i}\t{sw}\t{key}")?;
    }
    t.flush()
}

/// Print a [`FlowMatch`].
pub fn print_flow_match(fm: &FlowMatch) -> std::io::Result<()> {
    print_flow_match_into(&mut std::io::stdout(), fm)
}

/// Print horizontal rule in normal font.
fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::flow_match::FlowKey;

    #[test]
    fn condition_table() {
        let cond = Condition {
            nw_proto: Some(6),
            tp_dst_start: 80,
            tp_dst_end: 80,
            ..Default::default()
        };
        let mut out = vec![];
        print_condition_into(&mut out, "web", &cond).unwrap();
        let s = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = s.lines().collect();
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[1].starts_with("web"));
        assert!(lines[1].ends_with("nw_proto=6"));
        assert!(lines[2].trim().ends_with("tp_dst=80..=80"));
    }

    #[test]
    fn match_any_prints_star() {
        let mut out = vec![];
        print_condition_into(&mut out, "any", &Condition::match_any()).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s.lines().count(), 2);
        assert!(s.lines().nth(1).unwrap().ends_with('*'));
    }

    #[test]
    fn condition_set_table() {
        let set = ConditionSet::from_toml(
            "[conditions.dns]\nnw_proto = 17\n\n[conditions.any]\n",
        )
        .unwrap();
        let mut out = vec![];
        print_condition_set_into(&mut out, &set).unwrap();
        let s = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[1].starts_with("any"));
        assert!(lines[1].ends_with('*'));
        assert!(lines[2].starts_with("dns"));
        assert!(lines[2].ends_with("nw_proto=17"));
    }

    #[test]
    fn flow_match_table() {
        let fm = FlowMatch::new(vec![
            FlowKey::InPort(5),
            FlowKey::IcmpEcho { ty: 8, code: 0, id: 7 },
        ]);
        let mut out = vec![];
        print_flow_match_into(&mut out, &fm).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.starts_with("Flow Match (2 keys, user space only: true"));
        assert!(s.contains("in_port(5)"));
        let last = s.lines().last().unwrap();
        assert!(last.starts_with('1'));
        assert!(last.contains("yes"));
    }
}
