//! System V AMD64 calling-convention constants shared by the selector and
//! legalizer.

use crate::asm::Register;

/// Integer/pointer argument registers, in ABI order.
pub const INT_ARG_REGISTERS: [Register; 6] = Register::INT_ARG_REGISTERS;

/// `double` argument registers, in ABI order.
pub const SSE_ARG_REGISTERS: [Register; 8] = Register::SSE_ARG_REGISTERS;

/// Byte offset of the first stack-passed argument relative to `%rbp`:
/// 8 bytes for the pushed return address, 8 for the pushed `%rbp` itself.
pub const FIRST_STACK_ARG_OFFSET: i64 = 16;

/// Required stack alignment at the point of `call`, in bytes.
pub const STACK_ALIGNMENT: usize = 16;

/// Scratch registers the legalizer rewrites illegal operand forms through.
/// Never assigned to a pseudo; always free for a rewrite to clobber.
pub const SCRATCH_GP_1: Register = Register::R10;
pub const SCRATCH_GP_2: Register = Register::R11;
pub const SCRATCH_SHIFT_COUNT: Register = Register::Cx;
pub const SCRATCH_SSE_1: Register = Register::Xmm14;
pub const SCRATCH_SSE_2: Register = Register::Xmm15;
