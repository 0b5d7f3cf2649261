//! Machine-legalization pass (spec.md §4.I): assign stack slots to
//! `Pseudo` operands, then rewrite operand forms the x86-64 encoding
//! doesn't allow, via scratch registers. Implemented as a single `Vec`-based
//! pass rather than the two near-duplicate list/vector passes the original
//! carried (spec.md §9's duplication hazard).

use std::collections::HashMap;

use crate::asm::{
    BinaryOp, ConditionCode, FunctionDefinition, Instruction, Operand, Program, Register, TopLevel,
    UnaryOp, Width,
};
use crate::error::CodeGenError;

use super::runtime::{SCRATCH_GP_1, SCRATCH_GP_2, SCRATCH_SHIFT_COUNT, SCRATCH_SSE_1, STACK_ALIGNMENT};

/// Per-pseudo widths recorded by the selector, keyed by pseudo name. Needed
/// here because a `Pseudo`, once rewritten to `Stack`, forgets its own
/// width; every width-sensitive instruction already carries its own width
/// field, but offset *assignment* still needs to know how many bytes each
/// slot occupies and how it must be aligned.
pub struct PseudoLayout {
    pub widths: HashMap<String, Width>,
}

impl PseudoLayout {
    pub fn from_var_types(var_types: &HashMap<String, crate::types::Type>) -> Self {
        let mut widths = HashMap::new();
        for (name, ty) in var_types {
            let width = if ty.is_double() {
                Width::Double
            } else if ty.size() == 8 {
                Width::Quadword
            } else {
                Width::Longword
            };
            widths.insert(name.clone(), width);
        }
        PseudoLayout { widths }
    }
}

struct SlotAssigner<'a> {
    layout: &'a PseudoLayout,
    offsets: HashMap<String, i64>,
    current_offset: i64,
}

impl<'a> SlotAssigner<'a> {
    fn new(layout: &'a PseudoLayout) -> Self {
        SlotAssigner {
            layout,
            offsets: HashMap::new(),
            current_offset: 0,
        }
    }

    fn resolve(&mut self, operand: Operand) -> Operand {
        match operand {
            Operand::Pseudo(name) => {
                if let Some(offset) = self.offsets.get(name.as_ref()) {
                    return Operand::Stack(*offset);
                }
                let width = self
                    .layout
                    .widths
                    .get(name.as_ref())
                    .copied()
                    .unwrap_or(Width::Quadword);
                let size = width.bytes() as i64;
                self.current_offset -= size;
                // Align the slot to its own size so 8-byte values never
                // straddle a boundary a narrower neighbor left unaligned.
                self.current_offset -= self.current_offset.rem_euclid(size);
                self.offsets.insert(name.to_string(), self.current_offset);
                Operand::Stack(self.current_offset)
            }
            other => other,
        }
    }

    fn resolve_in(&mut self, inst: Instruction) -> Instruction {
        use Instruction as I;
        match inst {
            I::Mov { width, src, dst } => I::Mov {
                width,
                src: self.resolve(src),
                dst: self.resolve(dst),
            },
            I::Movsx { src, dst } => I::Movsx {
                src: self.resolve(src),
                dst: self.resolve(dst),
            },
            I::MovZeroExtend { src, dst } => I::MovZeroExtend {
                src: self.resolve(src),
                dst: self.resolve(dst),
            },
            I::Cvttsd2si { width, src, dst } => I::Cvttsd2si {
                width,
                src: self.resolve(src),
                dst: self.resolve(dst),
            },
            I::Cvtsi2sd { width, src, dst } => I::Cvtsi2sd {
                width,
                src: self.resolve(src),
                dst: self.resolve(dst),
            },
            I::Unary { op, width, operand } => I::Unary {
                op,
                width,
                operand: self.resolve(operand),
            },
            I::Binary { op, width, src, dst } => I::Binary {
                op,
                width,
                src: self.resolve(src),
                dst: self.resolve(dst),
            },
            I::DoubleBinary { op, src, dst } => I::DoubleBinary {
                op,
                src: self.resolve(src),
                dst: self.resolve(dst),
            },
            I::Cmp { width, lhs, rhs } => I::Cmp {
                width,
                lhs: self.resolve(lhs),
                rhs: self.resolve(rhs),
            },
            I::Comisd { lhs, rhs } => I::Comisd {
                lhs: self.resolve(lhs),
                rhs: self.resolve(rhs),
            },
            I::Idiv { width, operand } => I::Idiv {
                width,
                operand: self.resolve(operand),
            },
            I::Div { width, operand } => I::Div {
                width,
                operand: self.resolve(operand),
            },
            I::SetCC { cc, dst } => I::SetCC {
                cc,
                dst: self.resolve(dst),
            },
            I::Push(op) => I::Push(self.resolve(op)),
            I::PushXmm(op) => I::PushXmm(self.resolve(op)),
            I::Lea { src, dst } => I::Lea {
                src: self.resolve(src),
                dst: self.resolve(dst),
            },
            other @ (I::Cdq
            | I::Cqo
            | I::Jmp(_)
            | I::JmpCC { .. }
            | I::Label(_)
            | I::Call(_)
            | I::Ret
            | I::Comment(_)) => other,
        }
    }

    /// Stack reservation size, rounded up to 16 bytes (System V ABI frame
    /// alignment requirement).
    fn frame_size(&self) -> usize {
        let raw = self.current_offset.unsigned_abs() as usize;
        raw.div_ceil(STACK_ALIGNMENT) * STACK_ALIGNMENT
    }
}

fn rewrite_illegal_forms(body: Vec<Instruction>) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(body.len());
    for inst in body {
        match inst {
            Instruction::Mov { width, src, dst } if src.is_memory() && dst.is_memory() => {
                out.push(Instruction::Mov {
                    width,
                    src,
                    dst: Operand::Reg(SCRATCH_GP_1),
                });
                out.push(Instruction::Mov {
                    width,
                    src: Operand::Reg(SCRATCH_GP_1),
                    dst,
                });
            }
            Instruction::Cmp { width, lhs, rhs } if lhs.is_memory() && rhs.is_memory() => {
                out.push(Instruction::Mov {
                    width,
                    src: lhs,
                    dst: Operand::Reg(SCRATCH_GP_1),
                });
                out.push(Instruction::Cmp {
                    width,
                    lhs: Operand::Reg(SCRATCH_GP_1),
                    rhs,
                });
            }
            Instruction::Cmp { width, lhs, rhs } if rhs.is_immediate() => {
                out.push(Instruction::Mov {
                    width,
                    src: rhs,
                    dst: Operand::Reg(SCRATCH_GP_2),
                });
                out.push(Instruction::Cmp {
                    width,
                    lhs,
                    rhs: Operand::Reg(SCRATCH_GP_2),
                });
            }
            Instruction::Binary {
                op: op @ (BinaryOp::Add | BinaryOp::Sub | BinaryOp::And | BinaryOp::Xor | BinaryOp::Or),
                width,
                src,
                dst,
            } if src.is_memory() && dst.is_memory() => {
                out.push(Instruction::Mov {
                    width,
                    src,
                    dst: Operand::Reg(SCRATCH_GP_1),
                });
                out.push(Instruction::Binary {
                    op,
                    width,
                    src: Operand::Reg(SCRATCH_GP_1),
                    dst,
                });
            }
            Instruction::Binary {
                op: BinaryOp::Mul,
                width,
                src,
                dst,
            } if dst.is_memory() => {
                out.push(Instruction::Mov {
                    width,
                    src: dst.clone(),
                    dst: Operand::Reg(SCRATCH_GP_2),
                });
                out.push(Instruction::Binary {
                    op: BinaryOp::Mul,
                    width,
                    src,
                    dst: Operand::Reg(SCRATCH_GP_2),
                });
                out.push(Instruction::Mov {
                    width,
                    src: Operand::Reg(SCRATCH_GP_2),
                    dst,
                });
            }
            Instruction::Binary {
                op:
                    op
                    @ (BinaryOp::ShiftLeft | BinaryOp::ShiftRightArithmetic | BinaryOp::ShiftRightLogical),
                width,
                src,
                dst,
            } if src.is_memory() => {
                out.push(Instruction::Mov {
                    width: Width::Longword,
                    src,
                    dst: Operand::Reg(SCRATCH_SHIFT_COUNT),
                });
                out.push(Instruction::Binary {
                    op,
                    width,
                    src: Operand::Reg(SCRATCH_SHIFT_COUNT),
                    dst,
                });
            }
            Instruction::Idiv { width, operand } if operand.is_immediate() => {
                out.push(Instruction::Mov {
                    width,
                    src: operand,
                    dst: Operand::Reg(SCRATCH_GP_1),
                });
                out.push(Instruction::Idiv {
                    width,
                    operand: Operand::Reg(SCRATCH_GP_1),
                });
            }
            Instruction::Div { width, operand } if operand.is_immediate() => {
                out.push(Instruction::Mov {
                    width,
                    src: operand,
                    dst: Operand::Reg(SCRATCH_GP_1),
                });
                out.push(Instruction::Div {
                    width,
                    operand: Operand::Reg(SCRATCH_GP_1),
                });
            }
            // Cvttsd2si/Cvtsi2sd share Mov's both-memory restriction even
            // though this selector never emits that shape; legalized the
            // same way for robustness against future selector changes.
            Instruction::Cvttsd2si { width, src, dst } if src.is_memory() && dst.is_memory() => {
                out.push(Instruction::Mov {
                    width: Width::Double,
                    src,
                    dst: Operand::Reg(SCRATCH_SSE_1),
                });
                out.push(Instruction::Cvttsd2si {
                    width,
                    src: Operand::Reg(SCRATCH_SSE_1),
                    dst,
                });
            }
            Instruction::Cvtsi2sd { width, src, dst } if src.is_memory() && dst.is_memory() => {
                out.push(Instruction::Mov {
                    width,
                    src,
                    dst: Operand::Reg(SCRATCH_GP_1),
                });
                out.push(Instruction::Cvtsi2sd {
                    width,
                    src: Operand::Reg(SCRATCH_GP_1),
                    dst,
                });
            }
            other => out.push(other),
        }
    }
    out
}

fn legalize_function(
    def: FunctionDefinition,
    var_types: &HashMap<String, crate::types::Type>,
) -> FunctionDefinition {
    let layout = PseudoLayout::from_var_types(var_types);
    let mut assigner = SlotAssigner::new(&layout);
    let slot_assigned: Vec<Instruction> = def
        .body
        .into_iter()
        .map(|inst| assigner.resolve_in(inst))
        .collect();
    let stack_size = assigner.frame_size();
    FunctionDefinition {
        name: def.name,
        global: def.global,
        stack_size,
        body: rewrite_illegal_forms(slot_assigned),
    }
}

/// Legalizes every function in the selected program (spec.md §4.I). Static
/// variables pass through unchanged; they carry no pseudo operands.
pub fn legalize(
    program: Program,
    var_types: &HashMap<String, crate::types::Type>,
) -> Result<Program, CodeGenError> {
    let items = program
        .items
        .into_iter()
        .map(|item| match item {
            TopLevel::Function(def) => TopLevel::Function(legalize_function(def, var_types)),
            other @ TopLevel::StaticVariable(_) => other,
        })
        .collect();
    Ok(Program { items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn layout_with(name: &str, ty: Type) -> HashMap<String, Type> {
        let mut map = HashMap::new();
        map.insert(name.to_string(), ty);
        map
    }

    #[test]
    fn pseudo_gets_a_negative_stack_slot() {
        let var_types = layout_with("tmp.0", Type::Int);
        let layout = PseudoLayout::from_var_types(&var_types);
        let mut assigner = SlotAssigner::new(&layout);
        let resolved = assigner.resolve(Operand::pseudo("tmp.0"));
        assert!(matches!(resolved, Operand::Stack(offset) if offset < 0));
    }

    #[test]
    fn repeated_pseudo_reuses_its_slot() {
        let var_types = layout_with("tmp.0", Type::Int);
        let layout = PseudoLayout::from_var_types(&var_types);
        let mut assigner = SlotAssigner::new(&layout);
        let first = assigner.resolve(Operand::pseudo("tmp.0"));
        let second = assigner.resolve(Operand::pseudo("tmp.0"));
        assert_eq!(first, second);
    }

    #[test]
    fn mov_between_two_memory_operands_is_split_through_scratch() {
        let body = vec![Instruction::Mov {
            width: Width::Longword,
            src: Operand::Stack(-4),
            dst: Operand::Stack(-8),
        }];
        let rewritten = rewrite_illegal_forms(body);
        assert_eq!(rewritten.len(), 2);
        assert!(matches!(
            rewritten[0],
            Instruction::Mov {
                dst: Operand::Reg(Register::R10),
                ..
            }
        ));
    }

    #[test]
    fn cmp_with_immediate_rhs_is_rewritten() {
        let body = vec![Instruction::Cmp {
            width: Width::Longword,
            lhs: Operand::Stack(-4),
            rhs: Operand::Imm(5),
        }];
        let rewritten = rewrite_illegal_forms(body);
        assert_eq!(rewritten.len(), 2);
        assert!(matches!(
            rewritten[1],
            Instruction::Cmp {
                rhs: Operand::Reg(Register::R11),
                ..
            }
        ));
    }

    #[test]
    fn idiv_with_immediate_operand_is_rewritten() {
        let body = vec![Instruction::Idiv {
            width: Width::Longword,
            operand: Operand::Imm(3),
        }];
        let rewritten = rewrite_illegal_forms(body);
        assert_eq!(rewritten.len(), 2);
        assert!(matches!(
            rewritten[1],
            Instruction::Idiv {
                operand: Operand::Reg(Register::R10),
                ..
            }
        ));
    }
}
