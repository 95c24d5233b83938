//! Two-pass cleanup of a freshly emitted [`super::File`]: jump
//! threading, fallthrough-jump elimination, and label renumbering,
//! ported from `original_source/asm/relabel.cpp`.
//!
//! The original represents a line as `Box<dyn AsmLine>` and dispatches
//! `fill_label_info`/`clone_if_jump`/`update_label` virtually; here
//! [`Line`] is a closed enum, so the same three operations are direct
//! `match`es instead. Run twice in a row (spec.md §4.6): the second
//! call must be a no-op once the first has reached a fixed point,
//! which is exercised below as a property test.

use super::{File, LabelId, Line};

/// Maps each line index to the label id it jumps to (if any), and each
/// label id to the line index of its `LocalLabel` (duplicate
/// definitions chain through a pending stack exactly like the
/// original, so several labels can point at the very next real
/// instruction).
struct LabelInfo {
    jump_dest: Vec<Option<u32>>,
    label_inst: Vec<Option<usize>>,
}

fn fill_label_info(lines: &[Line], num_labels: usize) -> LabelInfo {
    let mut info = LabelInfo { jump_dest: vec![None; lines.len()], label_inst: vec![None; num_labels] };
    let mut pending: Vec<u32> = Vec::new();
    for (pos, line) in lines.iter().enumerate() {
        for id in pending.drain(..) {
            info.label_inst[id as usize] = Some(pos);
        }
        if let Line::LocalLabel(LabelId(id)) = line {
            pending.push(*id);
        }
        if let Some(target) = line.jump_target() {
            info.jump_dest[pos] = Some(target.0);
        }
    }
    // Any labels still pending point one past the end (an empty
    // function body, or trailing labels) — leave them unresolved;
    // nothing jumps to a label that's never actually reachable here.
    info
}

fn clone_if_jump(line: &Line) -> Option<Line> {
    match line {
        Line::Jump { target } => Some(Line::Jump { target: *target }),
        Line::JumpReg { rs } => Some(Line::JumpReg { rs: *rs }),
        _ => None,
    }
}

pub fn relabel(file: &mut File, num_labels: usize) {
    if file.lines.is_empty() {
        return;
    }

    // Pass 1: jump threading — a jump to another jump adopts that
    // jump's own target directly.
    let info = fill_label_info(&file.lines, num_labels);
    for i in (0..file.lines.len()).rev() {
        let Some(target) = info.jump_dest[i] else { continue };
        let Some(j) = info.label_inst[target as usize] else { continue };
        if j == i {
            continue;
        }
        if let Some(cloned) = clone_if_jump(&file.lines[j]) {
            file.lines[i] = cloned;
        }
    }

    // Pass 2: drop a jump whose target is the very next real
    // instruction (a fallthrough already gets there for free).
    let info = fill_label_info(&file.lines, num_labels);
    let mut keep = vec![true; file.lines.len()];
    let mut next_non_label = file.lines.len();
    for i in (0..file.lines.len()).rev() {
        if !file.lines[i].is_local_label() {
            next_non_label = i;
        }
        let Some(target) = info.jump_dest[i] else { continue };
        if info.label_inst[target as usize] == Some(next_non_label) {
            keep[i] = false;
        }
    }
    let filtered: Vec<Line> = file.lines.drain(..).zip(keep).filter(|(_, k)| *k).map(|(l, _)| l).collect();
    file.lines = filtered;

    // Pass 3: renumber only the labels that survive, coalescing
    // adjacent ids that name the very same instruction.
    let mut by_pos: Vec<(usize, usize)> = info
        .label_inst
        .iter()
        .enumerate()
        .filter_map(|(id, pos)| pos.map(|p| (p, id)))
        .collect();
    by_pos.sort_unstable();

    let mut used = vec![false; num_labels];
    for line in &file.lines {
        if let Some(target) = line.jump_target() {
            used[target.0 as usize] = true;
        }
    }

    let mut rules: Vec<Option<u32>> = vec![None; num_labels];
    let mut last_pos: Option<usize> = None;
    let mut last_label: i64 = -1;
    for (pos, id) in by_pos {
        if !used[id] {
            continue;
        }
        if last_pos != Some(pos) {
            last_pos = Some(pos);
            last_label += 1;
        }
        rules[id] = Some(last_label as u32);
    }

    let mut new_lines = Vec::with_capacity(file.lines.len());
    for line in file.lines.drain(..) {
        match line {
            Line::LocalLabel(LabelId(id)) => {
                if let Some(new_id) = rules[id as usize] {
                    new_lines.push(Line::LocalLabel(LabelId(new_id)));
                }
            }
            Line::Jump { target } => {
                new_lines.push(Line::Jump { target: LabelId(rules[target.0 as usize].expect("jump to an unused label")) });
            }
            Line::Branch { op, rs1, rs2, target } => {
                new_lines.push(Line::Branch { op, rs1, rs2, target: LabelId(rules[target.0 as usize].expect("branch to an unused label")) });
            }
            other => new_lines.push(other),
        }
    }
    file.lines = new_lines;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{BranchOp, Register};

    #[test]
    fn second_pass_is_a_fixed_point() {
        let mut file = File::new(vec![
            Line::Jump { target: LabelId(0) },
            Line::LocalLabel(LabelId(1)),
            Line::Branch { op: BranchOp::Eq, rs1: Register::A0, rs2: Register::A1, target: LabelId(1) },
            Line::LocalLabel(LabelId(0)),
            Line::Jump { target: LabelId(1) },
        ]);
        relabel(&mut file, 2);
        let once = file.lines.clone();
        relabel(&mut file, 2);
        assert_eq!(format!("{once:?}"), format!("{:?}", file.lines));
    }

    #[test]
    fn jump_to_jump_is_threaded() {
        let mut file = File::new(vec![
            Line::Jump { target: LabelId(0) },
            Line::LocalLabel(LabelId(0)),
            Line::Jump { target: LabelId(1) },
            Line::LocalLabel(LabelId(1)),
        ]);
        relabel(&mut file, 2);
        match &file.lines[0] {
            Line::Jump { target } => assert_eq!(file.lines.iter().position(|l| matches!(l, Line::LocalLabel(id) if *id == *target)), Some(file.lines.len() - 1)),
            other => panic!("expected a jump, got {other:?}"),
        }
    }

    #[test]
    fn fallthrough_jump_is_dropped() {
        let mut file = File::new(vec![Line::Jump { target: LabelId(0) }, Line::LocalLabel(LabelId(0)), Line::JumpReg { rs: Register::Ra }]);
        relabel(&mut file, 1);
        assert!(file.lines.iter().all(|l| !matches!(l, Line::Jump { .. })));
    }
}
