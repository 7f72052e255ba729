//! End-to-end byte-sequence checks, one per numbered scenario: a hand-built
//! micro IR stream goes through register allocation (scenarios 4-6) or is
//! built directly in already-allocated physical registers (scenarios 1-3,
//! mirroring how the peephole rules' own unit tests are set up), then
//! through peephole and the encoder, checked against the exact bytes x86-64
//! requires for that shape.

use ucode_codegen::builder::MicroIrBuilder;
use ucode_codegen::encoder::Encoder;
use ucode_codegen::entity::EntityRef;
use ucode_codegen::ir::{Ident, MicroOp, MicroOpBits};
use ucode_codegen::passes::{PassContext, PassManager};
use ucode_codegen::peephole;
use ucode_codegen::reg::{gpr, MicroReg};
use ucode_codegen::settings::CodegenFlags;
use ucode_codegen::symbol::SymbolTable;
use ucode_codegen::view::View;

fn encode_all(builder: &mut MicroIrBuilder, symbols: &SymbolTable) -> Vec<u8> {
    let (instrs, operands) = builder.arenas_mut();
    let mut view = View::new(instrs, operands);
    let probe = Encoder::new(symbols, 0, 0);
    peephole::run_to_fixed_point(&mut view, &probe, 8);

    let mut encoder = Encoder::new(symbols, 0, builder.label_count());
    let (instrs, operands) = builder.arenas_mut();
    for r in instrs.iter_refs() {
        let inst = instrs.get(r);
        if inst.is_erased() {
            continue;
        }
        let ops = operands.collect_span(&inst.operands);
        if inst.opcode == ucode_codegen::ir::MicroOpcode::Label {
            encoder.bind_label(ops[0].unwrap_label()).unwrap();
            continue;
        }
        let result = encoder.encode(inst, &ops).unwrap();
        assert_eq!(result, ucode_codegen::encoder::EncodeResult::Zero, "{:?} did not encode cleanly", inst.opcode);
    }
    let (bytes, _relocations) = encoder.finish().unwrap();
    bytes
}

/// `mov rax, rbx; add rax, 1; mov rbx, rax` folds down to one `add rbx, 1`.
#[test]
fn identity_copy_elimination() {
    let symbols = SymbolTable::new();
    let mut b = MicroIrBuilder::new(CodegenFlags::system_v());
    b.load_reg_reg(gpr::RAX, gpr::RBX, MicroOpBits::B64);
    b.op_binary_reg_imm(gpr::RAX, MicroOp::Add, MicroOpBits::B64, 1);
    b.load_reg_reg(gpr::RBX, gpr::RAX, MicroOpBits::B64);

    let bytes = encode_all(&mut b, &symbols);
    assert_eq!(bytes, vec![0x48, 0x83, 0xC3, 0x01]);
}

/// `mov rax, 42; cmp rbx, rax; jz L` folds the immediate into the compare.
#[test]
fn immediate_into_compare_fold() {
    let symbols = SymbolTable::new();
    let mut b = MicroIrBuilder::new(CodegenFlags::system_v());
    b.load_reg_imm(gpr::RAX, MicroOpBits::B32, 42);
    b.cmp_reg_reg(gpr::RBX, gpr::RAX, MicroOpBits::B32);
    let target = b.create_label();
    b.jump_to_label(ucode_codegen::ir::MicroCond::Eq, MicroOpBits::B64, target);
    b.place_label(target);

    let bytes = encode_all(&mut b, &symbols);
    // `cmp ebx, 42` with no REX (32-bit, neither register needs extension).
    assert_eq!(&bytes[..3], &[0x83, 0xFB, 0x2A]);
    // `jz` with a 32-bit relative displacement, landing immediately after.
    assert_eq!(&bytes[3..5], &[0x0F, 0x84]);
    assert_eq!(&bytes[5..9], &0i32.to_le_bytes());
}

/// `mov rax, rbx; add rax, 8` folds into a single `lea`.
#[test]
fn lea_from_copy_and_add() {
    let symbols = SymbolTable::new();
    let mut b = MicroIrBuilder::new(CodegenFlags::system_v());
    b.load_reg_reg(gpr::RAX, gpr::RBX, MicroOpBits::B64);
    b.op_binary_reg_imm(gpr::RAX, MicroOp::Add, MicroOpBits::B64, 8);

    let bytes = encode_all(&mut b, &symbols);
    assert_eq!(bytes, vec![0x48, 0x8D, 0x43, 0x08]);
}

/// A dense 4-way switch lowers to a RIP-relative jump table dispatch: one
/// load of the table address, a scaled index, and an indirect jump,
/// recorded as relocations against the segment symbol.
#[test]
fn jump_table_dispatch() {
    let symbols = SymbolTable::new();
    let segment = ucode_codegen::segment::Segment::new(&symbols, Ident::new(7));
    let mut b = MicroIrBuilder::new(CodegenFlags::system_v());

    let scrutinee = b.new_virt_int();
    b.load_reg_imm(scrutinee, MicroOpBits::B32, 2);
    let table_offset = segment.reserve_jump_table(4);
    let table_reg = b.new_virt_int();
    let offset_reg = b.new_virt_int();
    b.load_reg_reg(offset_reg, scrutinee, MicroOpBits::B32);
    let ip = MicroReg::instruction_pointer();
    b.jump_table(table_reg, offset_reg, ip, segment.symbol(), table_offset as i32);
    b.ret();

    let mut ctx = PassContext::new(&mut b, &symbols, 0);
    let output = PassManager::run(&mut ctx).unwrap();
    assert!(!output.bytes.is_empty());
    assert!(output.relocations.iter().any(|r| r.symbol == segment.symbol()));
}

/// `div v0, v1` with `v0` not already in `Rax` is legalized into a move
/// into `Rax`, the divide itself, and a move of the result back out.
#[test]
fn division_lowering_materializes_into_rax() {
    let symbols = SymbolTable::new();
    let mut b = MicroIrBuilder::new(CodegenFlags::system_v());
    let dividend = b.new_virt_int();
    let divisor = b.new_virt_int();
    b.load_reg_imm(dividend, MicroOpBits::B32, 100);
    b.load_reg_imm(divisor, MicroOpBits::B32, 3);
    b.op_binary_reg_reg(dividend, divisor, MicroOp::DivSigned, MicroOpBits::B32);
    b.ret();

    let mut ctx = PassContext::new(&mut b, &symbols, 0);
    let output = PassManager::run(&mut ctx).unwrap();
    // `cdq` (0x99) immediately followed by an `idiv r/m32` (0xF7 /7).
    assert!(output.bytes.windows(2).any(|w| w == [0x99, 0xF7]));
}

/// `mod v0, v1 (B8)` divides, then shifts the remainder down from `AH`
/// into `AL` with `shr eax, 8`.
#[test]
fn eight_bit_modulo_shifts_remainder_into_al() {
    let symbols = SymbolTable::new();
    let mut b = MicroIrBuilder::new(CodegenFlags::system_v());
    let dividend = b.new_virt_int();
    let divisor = b.new_virt_int();
    b.load_reg_imm(dividend, MicroOpBits::B8, 10);
    b.load_reg_imm(divisor, MicroOpBits::B8, 3);
    b.op_binary_reg_reg(dividend, divisor, MicroOp::ModUnsigned, MicroOpBits::B8);
    b.ret();

    let mut ctx = PassContext::new(&mut b, &symbols, 0);
    let output = PassManager::run(&mut ctx).unwrap();
    // `div r/m8` (0xF6 /6) immediately followed by `shr eax, 8` (0xC1 /5 ib).
    assert!(output.bytes.windows(5).any(|w| w[0] == 0xF6 && w[2] == 0xC1 && w[4] == 8));
}
