//! A reference evaluator for wasm2qbe IR.
//!
//! Executes the [`IrFunction`]s that the emitter would lower to QBE, so
//! translation semantics (phis, traps, tail-call loops, saturating
//! conversions, memory) can be checked without a QBE toolchain. Runtime
//! helpers for numerics, linear memory and tables are modelled here;
//! exceptions, GC objects and SIMD are not.
//!
//! Function references are opaque 64-bit addresses of imaginary descriptors,
//! so the IR's null checks and descriptor loads work unchanged.

use std::rc::Rc;
use thiserror::Error;
use wasm2qbe::decoder::{self, ElementItems, Module, ValType};
use wasm2qbe::ir::{
    self, static_init, BinOp, BlockId, DataRef, IrFunction, IrInstr, IrTerminator, IrValue,
    MemoryAccessWidth, SignExtension, StaticInit, UnOp, VarId,
};
use wasm2qbe::{validator, CompileOptions};
use wasm2qbe_abi::{RuntimeFn, TrapKind, FUNCREF_CODE_OFFSET, FUNCREF_TYPE_OFFSET, PAGE_SIZE};

/// Address of the first function descriptor.
const DESCRIPTOR_BASE: u64 = 0x7000_0000_0000;
const DESCRIPTOR_STRIDE: u64 = 16;
/// Base of the opaque addresses handed out for code pointers.
const CODE_BASE: u64 = 0x6000_0000_0000;
/// Base of the opaque addresses handed out for data symbols.
const DATA_BASE: u64 = 0x5000_0000_0000;

const MAX_CALL_DEPTH: usize = 256;
const DEFAULT_FUEL: u64 = 50_000_000;
/// Pages a 32-bit memory can ever have.
const MAX_PAGES_32: u64 = 65536;

/// Why evaluation stopped.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("trap: {}", .0.message())]
    Trap(TrapKind),
    #[error(transparent)]
    Compile(#[from] wasm2qbe::Error),
    #[error("invalid WebAssembly text: {0}")]
    Text(String),
    #[error("no exported function named {0:?}")]
    NoSuchExport(String),
    #[error("expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("out of fuel")]
    OutOfFuel,
    #[error("unsupported by the evaluator: {0}")]
    Unsupported(String),
    #[error("malformed IR: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, EvalError>;

fn malformed(message: impl Into<String>) -> EvalError {
    EvalError::Malformed(message.into())
}

fn unsupported(message: impl Into<String>) -> EvalError {
    EvalError::Unsupported(message.into())
}

#[derive(Debug, Clone)]
struct Memory {
    bytes: Vec<u8>,
    max_pages: u64,
}

impl Memory {
    fn pages(&self) -> u64 {
        self.bytes.len() as u64 / PAGE_SIZE
    }

    /// The byte range `[addr, addr + len)`, or an out-of-bounds trap.
    fn range(&self, addr: u64, len: u64) -> Result<std::ops::Range<usize>> {
        let end = addr
            .checked_add(len)
            .ok_or(EvalError::Trap(TrapKind::OutOfBounds))?;
        if end > self.bytes.len() as u64 {
            return Err(EvalError::Trap(TrapKind::OutOfBounds));
        }
        Ok(addr as usize..end as usize)
    }
}

#[derive(Debug, Clone)]
struct Table {
    entries: Vec<u64>,
    max: u64,
}

impl Table {
    fn check(&self, start: u64, len: u64) -> Result<std::ops::Range<usize>> {
        let end = start
            .checked_add(len)
            .ok_or(EvalError::Trap(TrapKind::OutOfBounds))?;
        if end > self.entries.len() as u64 {
            return Err(EvalError::Trap(TrapKind::OutOfBounds));
        }
        Ok(start as usize..end as usize)
    }
}

/// A compiled module plus the state the runtime would hold for it.
pub struct Instance {
    module: Rc<Module>,
    functions: Rc<Vec<IrFunction>>,
    globals: Vec<IrValue>,
    memories: Vec<Memory>,
    tables: Vec<Table>,
    dropped_data: Vec<bool>,
    dropped_elems: Vec<bool>,
    depth: usize,
    fuel: u64,
}

impl Instance {
    /// Decode, validate and translate `wasm_bytes`, then run the module
    /// initialiser.
    pub fn new(wasm_bytes: &[u8], options: &CompileOptions) -> Result<Self> {
        let module = decoder::decode(wasm_bytes, &options.limits).map_err(wasm2qbe::Error::from)?;
        validator::validate_module(&module, &options.limits, options.parallel)
            .map_err(wasm2qbe::Error::from)?;
        let functions = ir::build_functions(&module, options).map_err(wasm2qbe::Error::from)?;
        let init = ir::build_module_init(&module, options).map_err(wasm2qbe::Error::from)?;

        if module.num_imported_globals() > 0
            || module.num_imported_memories() > 0
            || module.num_imported_tables() > 0
        {
            return Err(unsupported("imported globals, memories or tables"));
        }

        let globals = module
            .globals
            .iter()
            .map(|g| match static_init(&g.init, g.ty.content) {
                Some(StaticInit::Value(v)) => Ok(v),
                Some(StaticInit::Func(f)) => Ok(IrValue::I64(descriptor(f) as i64)),
                None => IrValue::zero(g.ty.content)
                    .ok_or_else(|| unsupported("v128 globals")),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut instance = Instance {
            dropped_data: vec![false; module.data.len()],
            dropped_elems: vec![false; module.elements.len()],
            memories: Vec::new(),
            tables: Vec::new(),
            globals,
            module: Rc::new(module),
            functions: Rc::new(functions),
            depth: 0,
            fuel: DEFAULT_FUEL,
        };
        instance.run(&init, Vec::new())?;
        Ok(instance)
    }

    /// Assemble WebAssembly text, then [`Instance::new`].
    pub fn from_wat(source: &str, options: &CompileOptions) -> Result<Self> {
        let bytes = wasm2qbe::wat_to_wasm(source).map_err(|e| EvalError::Text(format!("{:#}", e)))?;
        Self::new(&bytes, options)
    }

    /// Limit the number of IR instructions executed from now on.
    pub fn set_fuel(&mut self, fuel: u64) {
        self.fuel = fuel;
    }

    /// Call the exported function `name`.
    pub fn call_export(&mut self, name: &str, args: &[IrValue]) -> Result<Vec<IrValue>> {
        let func = self
            .module
            .exports
            .iter()
            .find(|e| e.name == name && e.kind == decoder::ExternalKind::Func)
            .map(|e| e.index)
            .ok_or_else(|| EvalError::NoSuchExport(name.to_string()))?;
        self.call(func, args.to_vec())
    }

    /// Call an `(i32...) -> i32` export.
    pub fn call_i32(&mut self, name: &str, args: &[i32]) -> Result<i32> {
        let args: Vec<IrValue> = args.iter().map(|a| IrValue::I32(*a)).collect();
        match self.call_export(name, &args)?.as_slice() {
            [IrValue::I32(v)] => Ok(*v),
            other => Err(malformed(format!("{} returned {:?}", name, other))),
        }
    }

    /// Value of global `idx` (in the module's global index space).
    pub fn global(&self, idx: u32) -> Option<IrValue> {
        self.globals.get(idx as usize).copied()
    }

    /// Bytes of memory `idx`.
    pub fn memory(&self, idx: u32) -> Option<&[u8]> {
        self.memories.get(idx as usize).map(|m| m.bytes.as_slice())
    }

    fn call(&mut self, func: u32, args: Vec<IrValue>) -> Result<Vec<IrValue>> {
        let first = self.module.num_imported_funcs();
        if func < first {
            let name = self.module.func_name(func);
            return Err(unsupported(format!("call to imported function {}", name)));
        }
        let functions = Rc::clone(&self.functions);
        let ir = functions
            .get((func - first) as usize)
            .ok_or_else(|| malformed(format!("no function {}", func)))?;
        if args.len() != ir.params.len() {
            return Err(EvalError::ArgumentCount {
                expected: ir.params.len(),
                got: args.len(),
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(EvalError::CallStackExhausted);
        }
        self.depth += 1;
        let result = self.run(ir, args);
        self.depth -= 1;
        result
    }

    /// Execute one IR function from its entry block.
    fn run(&mut self, func: &IrFunction, args: Vec<IrValue>) -> Result<Vec<IrValue>> {
        let mut frame = Frame::new(func, args)?;
        let mut prev: Option<BlockId> = None;
        let mut current = func.entry_block;

        loop {
            let block = func
                .blocks
                .get(current.0 as usize)
                .ok_or_else(|| malformed(format!("no block {}", current)))?;

            // Phis read their inputs before any of them is written.
            let mut incoming = Vec::with_capacity(block.phis.len());
            for phi in &block.phis {
                let from = prev.ok_or_else(|| malformed("phi in the entry block"))?;
                let (_, value) = phi
                    .incoming
                    .iter()
                    .find(|(pred, _)| *pred == from)
                    .ok_or_else(|| {
                        malformed(format!("{} has no phi input from {}", block.id, from))
                    })?;
                incoming.push((phi.dest, frame.get(*value)?));
            }
            for (dest, value) in incoming {
                frame.set(dest, value);
            }

            for instr in &block.instructions {
                if self.fuel == 0 {
                    return Err(EvalError::OutOfFuel);
                }
                self.fuel -= 1;
                if let Some((callee, args, dests)) = self.exec(&mut frame, instr)? {
                    let results = self.call(callee, args)?;
                    frame.set_all(dests, results)?;
                }
            }

            prev = Some(current);
            current = match &block.terminator {
                IrTerminator::Return { values } => {
                    return values.iter().map(|v| frame.get(*v)).collect();
                }
                IrTerminator::Jump { target } => *target,
                IrTerminator::BranchIf {
                    condition,
                    if_true,
                    if_false,
                } => {
                    if frame.get_i32(*condition)? != 0 {
                        *if_true
                    } else {
                        *if_false
                    }
                }
                IrTerminator::BranchTable {
                    index,
                    targets,
                    default,
                } => {
                    let i = frame.get_i32(*index)? as u32 as usize;
                    targets.get(i).copied().unwrap_or(*default)
                }
                IrTerminator::Unreachable => return Err(EvalError::Trap(TrapKind::Unreachable)),
                IrTerminator::Halt => return Err(malformed("reached a halt terminator")),
            };
        }
    }

    /// Execute one instruction. Calls are handed back to [`Instance::run`]
    /// so the evaluator only recurses through `run`.
    fn exec<'i>(&mut self, frame: &mut Frame, instr: &'i IrInstr) -> Result<Option<Call<'i>>> {
        match instr {
            IrInstr::Const { dest, value } => frame.set(*dest, *value),
            IrInstr::BinOp { dest, op, lhs, rhs } => {
                let value = binop(*op, frame.get(*lhs)?, frame.get(*rhs)?)?;
                frame.set(*dest, value);
            }
            IrInstr::UnOp { dest, op, operand } => {
                let value = unop(*op, frame.get(*operand)?)?;
                frame.set(*dest, value);
            }
            IrInstr::Select {
                dest,
                cond,
                if_true,
                if_false,
            } => {
                let pick = if frame.get_i32(*cond)? != 0 {
                    if_true
                } else {
                    if_false
                };
                let value = frame.get(*pick)?;
                frame.set(*dest, value);
            }
            IrInstr::LocalGet { dest, local } => {
                let value = *frame
                    .locals
                    .get(*local as usize)
                    .ok_or_else(|| malformed(format!("no local {}", local)))?;
                frame.set(*dest, value);
            }
            IrInstr::LocalSet { local, value } => {
                let value = frame.get(*value)?;
                let slot = frame
                    .locals
                    .get_mut(*local as usize)
                    .ok_or_else(|| malformed(format!("no local {}", local)))?;
                *slot = value;
            }
            IrInstr::GlobalGet { dest, global } => {
                let value = self
                    .global(*global)
                    .ok_or_else(|| malformed(format!("no global {}", global)))?;
                frame.set(*dest, value);
            }
            IrInstr::GlobalSet { global, value } => {
                let value = frame.get(*value)?;
                let slot = self
                    .globals
                    .get_mut(*global as usize)
                    .ok_or_else(|| malformed(format!("no global {}", global)))?;
                *slot = value;
            }
            IrInstr::Load {
                dest,
                ty,
                width,
                sign,
                memory,
                addr,
                offset,
            } => {
                let base = address(frame.get(*addr)?);
                let addr = base
                    .checked_add(*offset)
                    .ok_or(EvalError::Trap(TrapKind::OutOfBounds))?;
                let len = width.bytes(*ty) as u64;
                let mem = self.memory_mut(*memory)?;
                let range = mem.range(addr, len)?;
                let mut raw = [0u8; 8];
                raw[..range.len()].copy_from_slice(&mem.bytes[range]);
                let value = load_value(*ty, *width, *sign, u64::from_le_bytes(raw))?;
                frame.set(*dest, value);
            }
            IrInstr::Store {
                ty,
                width,
                memory,
                addr,
                value,
                offset,
            } => {
                let base = address(frame.get(*addr)?);
                let addr = base
                    .checked_add(*offset)
                    .ok_or(EvalError::Trap(TrapKind::OutOfBounds))?;
                let len = width.bytes(*ty) as usize;
                if len > 8 {
                    return Err(unsupported("v128 stores"));
                }
                let bits = bits(frame.get(*value)?).to_le_bytes();
                let mem = self.memory_mut(*memory)?;
                let range = mem.range(addr, len as u64)?;
                mem.bytes[range].copy_from_slice(&bits[..len]);
            }
            IrInstr::FieldLoad {
                dest,
                ty,
                base,
                offset,
                ..
            } => {
                let func = func_of(frame.get(*base)?)?;
                let value = match *offset as u64 {
                    FUNCREF_TYPE_OFFSET => {
                        let type_idx = self
                            .module
                            .func_type_idx(func)
                            .ok_or_else(|| malformed(format!("function {} has no type", func)))?;
                        IrValue::I64(self.module.canonical_type_idx(type_idx) as i64)
                    }
                    FUNCREF_CODE_OFFSET => IrValue::I64((CODE_BASE + func as u64) as i64),
                    other => return Err(unsupported(format!("descriptor field at {}", other))),
                };
                if value.ty() != *ty && !matches!(ty, ValType::Ref(_)) {
                    return Err(malformed(format!("descriptor field read as {:?}", ty)));
                }
                frame.set(*dest, value);
            }
            IrInstr::FieldStore { .. } => return Err(unsupported("stores through host pointers")),
            IrInstr::Call { dests, func, args } => {
                return Ok(Some((*func, frame.get_all(args)?, dests.as_slice())));
            }
            IrInstr::CallRef {
                dests,
                target,
                args,
                ..
            } => {
                let func = func_of(frame.get(*target)?)?;
                return Ok(Some((func, frame.get_all(args)?, dests.as_slice())));
            }
            IrInstr::CallRuntime { dest, func, args } => {
                let args = frame.get_all(args)?;
                let result = self.runtime(*func, &args)?;
                match (dest, result) {
                    (Some(dest), Some(value)) => frame.set(*dest, value),
                    (None, None) => {}
                    _ => {
                        return Err(malformed(format!(
                            "{} result does not match its destination",
                            func.symbol()
                        )))
                    }
                }
            }
            IrInstr::CallSimd { name, .. } => {
                return Err(unsupported(format!("SIMD operation {}", name)))
            }
            IrInstr::RefFunc { dest, func } => {
                frame.set(*dest, IrValue::I64(descriptor(*func) as i64));
            }
            IrInstr::DataAddr { dest, data } => {
                let n = match data {
                    DataRef::Data(n) => *n as u64,
                    DataRef::Elem(n) => (1 << 32) | *n as u64,
                };
                frame.set(*dest, IrValue::I64((DATA_BASE + n) as i64));
            }
            IrInstr::StackSlot { .. } => return Err(unsupported("stack slots")),
            IrInstr::TrapIf { cond, trap } => {
                if frame.get_i32(*cond)? != 0 {
                    return Err(EvalError::Trap(*trap));
                }
            }
        }
        Ok(None)
    }

    fn memory_mut(&mut self, idx: u32) -> Result<&mut Memory> {
        self.memories
            .get_mut(idx as usize)
            .ok_or_else(|| malformed(format!("memory {} was never created", idx)))
    }

    fn table_mut(&mut self, idx: u32) -> Result<&mut Table> {
        self.tables
            .get_mut(idx as usize)
            .ok_or_else(|| malformed(format!("table {} was never created", idx)))
    }

    /// Descriptor addresses of element segment `seg`, empty once dropped.
    fn elem_items(&self, seg: u32) -> Result<Vec<u64>> {
        if self.dropped_elems.get(seg as usize).copied().unwrap_or(true) {
            return Ok(Vec::new());
        }
        let segment = &self.module.elements[seg as usize];
        match &segment.items {
            ElementItems::Functions(funcs) => Ok(funcs.iter().map(|f| descriptor(*f)).collect()),
            ElementItems::Expressions(exprs) => exprs
                .iter()
                .map(|e| match static_init(e, ValType::Ref(segment.ty)) {
                    Some(StaticInit::Func(f)) => Ok(descriptor(f)),
                    Some(StaticInit::Value(v)) => Ok(bits(v)),
                    None => Err(unsupported("computed element items")),
                })
                .collect(),
        }
    }

    /// The runtime helpers compiled code links against.
    fn runtime(&mut self, func: RuntimeFn, args: &[IrValue]) -> Result<Option<IrValue>> {
        let expected = func.signature().params.len();
        if args.len() != expected {
            return Err(malformed(format!(
                "{} takes {} arguments, got {}",
                func.symbol(),
                expected,
                args.len()
            )));
        }
        let int = |i: usize| bits(args[i]);
        let f32_arg = |i: usize| f32::from_bits(int(i) as u32);
        let f64_arg = |i: usize| f64::from_bits(int(i));
        let i32_out = |v: u32| Some(IrValue::I32(v as i32));
        let i64_out = |v: u64| Some(IrValue::I64(v as i64));
        let f32_out = |v: f32| Some(IrValue::F32(v.to_bits()));
        let f64_out = |v: f64| Some(IrValue::F64(v.to_bits()));

        Ok(match func {
            RuntimeFn::I32Clz => i32_out((int(0) as u32).leading_zeros()),
            RuntimeFn::I32Ctz => i32_out((int(0) as u32).trailing_zeros()),
            RuntimeFn::I32Popcnt => i32_out((int(0) as u32).count_ones()),
            RuntimeFn::I32Rotl => i32_out((int(0) as u32).rotate_left(int(1) as u32)),
            RuntimeFn::I32Rotr => i32_out((int(0) as u32).rotate_right(int(1) as u32)),
            RuntimeFn::I64Clz => i64_out(int(0).leading_zeros() as u64),
            RuntimeFn::I64Ctz => i64_out(int(0).trailing_zeros() as u64),
            RuntimeFn::I64Popcnt => i64_out(int(0).count_ones() as u64),
            RuntimeFn::I64Rotl => i64_out(int(0).rotate_left(int(1) as u32)),
            RuntimeFn::I64Rotr => i64_out(int(0).rotate_right(int(1) as u32)),

            RuntimeFn::F32Abs => f32_out(f32_arg(0).abs()),
            RuntimeFn::F32Ceil => f32_out(f32_arg(0).ceil()),
            RuntimeFn::F32Floor => f32_out(f32_arg(0).floor()),
            RuntimeFn::F32Trunc => f32_out(f32_arg(0).trunc()),
            RuntimeFn::F32Nearest => f32_out(f32_arg(0).round_ties_even()),
            RuntimeFn::F32Sqrt => f32_out(f32_arg(0).sqrt()),
            RuntimeFn::F32Min => f32_out(wasm_min(f32_arg(0) as f64, f32_arg(1) as f64) as f32),
            RuntimeFn::F32Max => f32_out(wasm_max(f32_arg(0) as f64, f32_arg(1) as f64) as f32),
            RuntimeFn::F32Copysign => f32_out(f32_arg(0).copysign(f32_arg(1))),
            RuntimeFn::F64Abs => f64_out(f64_arg(0).abs()),
            RuntimeFn::F64Ceil => f64_out(f64_arg(0).ceil()),
            RuntimeFn::F64Floor => f64_out(f64_arg(0).floor()),
            RuntimeFn::F64Trunc => f64_out(f64_arg(0).trunc()),
            RuntimeFn::F64Nearest => f64_out(f64_arg(0).round_ties_even()),
            RuntimeFn::F64Sqrt => f64_out(f64_arg(0).sqrt()),
            RuntimeFn::F64Min => f64_out(wasm_min(f64_arg(0), f64_arg(1))),
            RuntimeFn::F64Max => f64_out(wasm_max(f64_arg(0), f64_arg(1))),
            RuntimeFn::F64Copysign => f64_out(f64_arg(0).copysign(f64_arg(1))),

            RuntimeFn::MemoryNew => {
                let idx = int(0) as usize;
                let is64 = int(3) as u32 != 0;
                let ceiling = if is64 { u64::MAX / PAGE_SIZE } else { MAX_PAGES_32 };
                let max_pages = match int(2) as i64 {
                    -1 => ceiling,
                    max => (max as u64).min(ceiling),
                };
                let bytes = vec![0; (int(1) * PAGE_SIZE) as usize];
                if self.memories.len() <= idx {
                    self.memories.resize(
                        idx + 1,
                        Memory {
                            bytes: Vec::new(),
                            max_pages: 0,
                        },
                    );
                }
                self.memories[idx] = Memory { bytes, max_pages };
                None
            }
            RuntimeFn::MemoryBytes => {
                let mem = self.memory_mut(int(0) as u32)?;
                i64_out(mem.bytes.len() as u64)
            }
            RuntimeFn::MemoryBase => return Err(unsupported("host memory addresses")),
            RuntimeFn::MemorySizePages => i32_out(self.memory_mut(int(0) as u32)?.pages() as u32),
            RuntimeFn::MemorySizePages64 => i64_out(self.memory_mut(int(0) as u32)?.pages()),
            RuntimeFn::MemoryGrow | RuntimeFn::MemoryGrow64 => {
                let delta = if func == RuntimeFn::MemoryGrow {
                    int(1) as u32 as u64
                } else {
                    int(1)
                };
                let mem = self.memory_mut(int(0) as u32)?;
                let old = mem.pages();
                let grown = match old.checked_add(delta) {
                    Some(new) if new <= mem.max_pages => {
                        mem.bytes.resize((new * PAGE_SIZE) as usize, 0);
                        old
                    }
                    _ => u64::MAX,
                };
                if func == RuntimeFn::MemoryGrow {
                    i32_out(grown as u32)
                } else {
                    i64_out(grown)
                }
            }
            RuntimeFn::MemoryInit => {
                let seg = int(1) as usize;
                let (dst, src, len) = (int(4), int(5) as u32 as u64, int(6) as u32 as u64);
                let data: &[u8] = if self.dropped_data.get(seg).copied().unwrap_or(true) {
                    &[]
                } else {
                    &self.module.data[seg].data
                };
                let end = src
                    .checked_add(len)
                    .filter(|end| *end <= data.len() as u64)
                    .ok_or(EvalError::Trap(TrapKind::OutOfBounds))?;
                let bytes = data[src as usize..end as usize].to_vec();
                let mem = self.memory_mut(int(0) as u32)?;
                let range = mem.range(dst, len)?;
                mem.bytes[range].copy_from_slice(&bytes);
                None
            }
            RuntimeFn::DataDrop => {
                if let Some(dropped) = self.dropped_data.get_mut(int(0) as usize) {
                    *dropped = true;
                }
                None
            }
            RuntimeFn::MemoryCopy => {
                let (dst_mem, src_mem) = (int(0) as u32, int(1) as u32);
                let (dst, src, len) = (int(2), int(3), int(4));
                let src_range = self.memory_mut(src_mem)?.range(src, len)?;
                let bytes = self.memory_mut(src_mem)?.bytes[src_range].to_vec();
                let target = self.memory_mut(dst_mem)?;
                let range = target.range(dst, len)?;
                target.bytes[range].copy_from_slice(&bytes);
                None
            }
            RuntimeFn::MemoryFill => {
                let value = int(2) as u8;
                let mem = self.memory_mut(int(0) as u32)?;
                let range = mem.range(int(1), int(3))?;
                mem.bytes[range].fill(value);
                None
            }

            RuntimeFn::TableNew => {
                let idx = int(0) as usize;
                let max = match int(2) as i32 {
                    -1 => u32::MAX as u64,
                    max => max as u32 as u64,
                };
                let table = Table {
                    entries: vec![int(3); int(1) as u32 as usize],
                    max,
                };
                if self.tables.len() <= idx {
                    self.tables.resize(
                        idx + 1,
                        Table {
                            entries: Vec::new(),
                            max: 0,
                        },
                    );
                }
                self.tables[idx] = table;
                None
            }
            RuntimeFn::TableGet => {
                let table = self.table_mut(int(0) as u32)?;
                let range = table.check(int(1) as u32 as u64, 1)?;
                i64_out(table.entries[range.start])
            }
            RuntimeFn::TableSet => {
                let value = int(2);
                let table = self.table_mut(int(0) as u32)?;
                let range = table.check(int(1) as u32 as u64, 1)?;
                table.entries[range.start] = value;
                None
            }
            RuntimeFn::TableSize => i32_out(self.table_mut(int(0) as u32)?.entries.len() as u32),
            RuntimeFn::TableGrow => {
                let (init, delta) = (int(1), int(2) as u32 as u64);
                let table = self.table_mut(int(0) as u32)?;
                let old = table.entries.len() as u64;
                match old.checked_add(delta) {
                    Some(new) if new <= table.max => {
                        table.entries.resize(new as usize, init);
                        i32_out(old as u32)
                    }
                    _ => i32_out(u32::MAX),
                }
            }
            RuntimeFn::TableFill => {
                let value = int(2);
                let table = self.table_mut(int(0) as u32)?;
                let range = table.check(int(1) as u32 as u64, int(3) as u32 as u64)?;
                table.entries[range].fill(value);
                None
            }
            RuntimeFn::TableCopy => {
                let (dst_table, src_table) = (int(0) as u32, int(1) as u32);
                let (dst, src, len) = (
                    int(2) as u32 as u64,
                    int(3) as u32 as u64,
                    int(4) as u32 as u64,
                );
                let src_table = self.table_mut(src_table)?;
                let range = src_table.check(src, len)?;
                let items = src_table.entries[range].to_vec();
                let dst_table = self.table_mut(dst_table)?;
                let range = dst_table.check(dst, len)?;
                dst_table.entries[range].copy_from_slice(&items);
                None
            }
            RuntimeFn::TableInit => {
                let items = self.elem_items(int(1) as u32)?;
                let (dst, src, len) = (
                    int(4) as u32 as u64,
                    int(5) as u32 as u64,
                    int(6) as u32 as u64,
                );
                let end = src
                    .checked_add(len)
                    .filter(|end| *end <= items.len() as u64)
                    .ok_or(EvalError::Trap(TrapKind::OutOfBounds))?;
                let table = self.table_mut(int(0) as u32)?;
                let range = table.check(dst, len)?;
                table.entries[range].copy_from_slice(&items[src as usize..end as usize]);
                None
            }
            RuntimeFn::ElemDrop => {
                if let Some(dropped) = self.dropped_elems.get_mut(int(0) as usize) {
                    *dropped = true;
                }
                None
            }

            other => return Err(unsupported(format!("runtime helper {}", other.symbol()))),
        })
    }
}

/// A call requested by an instruction: callee, arguments, destinations.
type Call<'i> = (u32, Vec<IrValue>, &'i [VarId]);

/// Variables and local slots of one activation.
struct Frame {
    vars: Vec<Option<IrValue>>,
    locals: Vec<IrValue>,
}

impl Frame {
    fn new(func: &IrFunction, args: Vec<IrValue>) -> Result<Self> {
        let mut locals = args;
        for ty in &func.locals[locals.len().min(func.locals.len())..] {
            locals.push(IrValue::zero(*ty).ok_or_else(|| unsupported("v128 locals"))?);
        }
        Ok(Frame {
            vars: vec![None; func.var_types.len()],
            locals,
        })
    }

    fn get(&self, var: VarId) -> Result<IrValue> {
        self.vars
            .get(var.0 as usize)
            .copied()
            .flatten()
            .ok_or_else(|| malformed(format!("{} read before it was defined", var)))
    }

    fn get_i32(&self, var: VarId) -> Result<i32> {
        match self.get(var)? {
            IrValue::I32(v) => Ok(v),
            other => Err(malformed(format!("{} is {:?}, expected i32", var, other))),
        }
    }

    fn get_all(&self, vars: &[VarId]) -> Result<Vec<IrValue>> {
        vars.iter().map(|v| self.get(*v)).collect()
    }

    fn set(&mut self, var: VarId, value: IrValue) {
        let idx = var.0 as usize;
        if self.vars.len() <= idx {
            self.vars.resize(idx + 1, None);
        }
        self.vars[idx] = Some(value);
    }

    fn set_all(&mut self, dests: &[VarId], values: Vec<IrValue>) -> Result<()> {
        if dests.len() != values.len() {
            return Err(malformed(format!(
                "{} results for {} destinations",
                values.len(),
                dests.len()
            )));
        }
        for (dest, value) in dests.iter().zip(values) {
            self.set(*dest, value);
        }
        Ok(())
    }
}

fn descriptor(func: u32) -> u64 {
    DESCRIPTOR_BASE + func as u64 * DESCRIPTOR_STRIDE
}

/// The function a descriptor address refers to.
fn func_of(value: IrValue) -> Result<u32> {
    let addr = bits(value);
    if addr == 0 {
        return Err(EvalError::Trap(TrapKind::NullReference));
    }
    addr.checked_sub(DESCRIPTOR_BASE)
        .filter(|off| off % DESCRIPTOR_STRIDE == 0)
        .map(|off| (off / DESCRIPTOR_STRIDE) as u32)
        .ok_or_else(|| malformed(format!("{:#x} is not a function descriptor", addr)))
}

/// Raw bits of a value, zero-extended.
fn bits(value: IrValue) -> u64 {
    match value {
        IrValue::I32(v) => v as u32 as u64,
        IrValue::I64(v) => v as u64,
        IrValue::F32(b) => b as u64,
        IrValue::F64(b) => b,
    }
}

/// A linear memory address: i32 addresses are unsigned.
fn address(value: IrValue) -> u64 {
    bits(value)
}

fn load_value(
    ty: ValType,
    width: MemoryAccessWidth,
    sign: Option<SignExtension>,
    raw: u64,
) -> Result<IrValue> {
    let signed = sign == Some(SignExtension::Signed);
    let extended = match width {
        MemoryAccessWidth::I8 if signed => raw as u8 as i8 as i64 as u64,
        MemoryAccessWidth::I8 => raw as u8 as u64,
        MemoryAccessWidth::I16 if signed => raw as u16 as i16 as i64 as u64,
        MemoryAccessWidth::I16 => raw as u16 as u64,
        MemoryAccessWidth::I32 if signed => raw as u32 as i32 as i64 as u64,
        MemoryAccessWidth::I32 => raw as u32 as u64,
        MemoryAccessWidth::Full => raw,
    };
    Ok(match ty {
        ValType::I32 => IrValue::I32(extended as u32 as i32),
        ValType::I64 | ValType::Ref(_) => IrValue::I64(extended as i64),
        ValType::F32 => IrValue::F32(extended as u32),
        ValType::F64 => IrValue::F64(extended),
        ValType::V128 => return Err(unsupported("v128 loads")),
    })
}

fn wasm_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else {
        a.min(b)
    }
}

fn wasm_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else {
        a.max(b)
    }
}

fn flag(b: bool) -> IrValue {
    IrValue::I32(b as i32)
}

fn binop(op: BinOp, lhs: IrValue, rhs: IrValue) -> Result<IrValue> {
    use BinOp::*;
    use IrValue::{F32, F64, I32, I64};

    let div_trap = EvalError::Trap(TrapKind::DivByZero);
    Ok(match (op, lhs, rhs) {
        (I32Add, I32(a), I32(b)) => I32(a.wrapping_add(b)),
        (I32Sub, I32(a), I32(b)) => I32(a.wrapping_sub(b)),
        (I32Mul, I32(a), I32(b)) => I32(a.wrapping_mul(b)),
        (I32DivS, I32(a), I32(b)) => I32(a.checked_div(b).ok_or(div_trap)?),
        (I32DivU, I32(a), I32(b)) => I32((a as u32).checked_div(b as u32).ok_or(div_trap)? as i32),
        (I32RemS, I32(a), I32(b)) => I32(a.checked_rem(b).ok_or(div_trap)?),
        (I32RemU, I32(a), I32(b)) => I32((a as u32).checked_rem(b as u32).ok_or(div_trap)? as i32),
        (I32And, I32(a), I32(b)) => I32(a & b),
        (I32Or, I32(a), I32(b)) => I32(a | b),
        (I32Xor, I32(a), I32(b)) => I32(a ^ b),
        (I32Shl, I32(a), I32(b)) => I32(a.wrapping_shl(b as u32)),
        (I32ShrS, I32(a), I32(b)) => I32(a.wrapping_shr(b as u32)),
        (I32ShrU, I32(a), I32(b)) => I32((a as u32).wrapping_shr(b as u32) as i32),
        (I32Eq, I32(a), I32(b)) => flag(a == b),
        (I32Ne, I32(a), I32(b)) => flag(a != b),
        (I32LtS, I32(a), I32(b)) => flag(a < b),
        (I32LtU, I32(a), I32(b)) => flag((a as u32) < b as u32),
        (I32GtS, I32(a), I32(b)) => flag(a > b),
        (I32GtU, I32(a), I32(b)) => flag(a as u32 > b as u32),
        (I32LeS, I32(a), I32(b)) => flag(a <= b),
        (I32LeU, I32(a), I32(b)) => flag(a as u32 <= b as u32),
        (I32GeS, I32(a), I32(b)) => flag(a >= b),
        (I32GeU, I32(a), I32(b)) => flag(a as u32 >= b as u32),

        (I64Add, I64(a), I64(b)) => I64(a.wrapping_add(b)),
        (I64Sub, I64(a), I64(b)) => I64(a.wrapping_sub(b)),
        (I64Mul, I64(a), I64(b)) => I64(a.wrapping_mul(b)),
        (I64DivS, I64(a), I64(b)) => I64(a.checked_div(b).ok_or(div_trap)?),
        (I64DivU, I64(a), I64(b)) => I64((a as u64).checked_div(b as u64).ok_or(div_trap)? as i64),
        (I64RemS, I64(a), I64(b)) => I64(a.checked_rem(b).ok_or(div_trap)?),
        (I64RemU, I64(a), I64(b)) => I64((a as u64).checked_rem(b as u64).ok_or(div_trap)? as i64),
        (I64And, I64(a), I64(b)) => I64(a & b),
        (I64Or, I64(a), I64(b)) => I64(a | b),
        (I64Xor, I64(a), I64(b)) => I64(a ^ b),
        (I64Shl, I64(a), I64(b)) => I64(a.wrapping_shl(b as u32)),
        (I64ShrS, I64(a), I64(b)) => I64(a.wrapping_shr(b as u32)),
        (I64ShrU, I64(a), I64(b)) => I64((a as u64).wrapping_shr(b as u32) as i64),
        (I64Eq, I64(a), I64(b)) => flag(a == b),
        (I64Ne, I64(a), I64(b)) => flag(a != b),
        (I64LtS, I64(a), I64(b)) => flag(a < b),
        (I64LtU, I64(a), I64(b)) => flag((a as u64) < b as u64),
        (I64GtS, I64(a), I64(b)) => flag(a > b),
        (I64GtU, I64(a), I64(b)) => flag(a as u64 > b as u64),
        (I64LeS, I64(a), I64(b)) => flag(a <= b),
        (I64LeU, I64(a), I64(b)) => flag(a as u64 <= b as u64),
        (I64GeS, I64(a), I64(b)) => flag(a >= b),
        (I64GeU, I64(a), I64(b)) => flag(a as u64 >= b as u64),

        (F32Add | F32Sub | F32Mul | F32Div, F32(a), F32(b)) => {
            let (a, b) = (f32::from_bits(a), f32::from_bits(b));
            let r = match op {
                F32Add => a + b,
                F32Sub => a - b,
                F32Mul => a * b,
                _ => a / b,
            };
            F32(r.to_bits())
        }
        (F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge | F32Unordered, F32(a), F32(b)) => {
            let (a, b) = (f32::from_bits(a), f32::from_bits(b));
            flag(compare(op, a as f64, b as f64))
        }
        (F64Add | F64Sub | F64Mul | F64Div, F64(a), F64(b)) => {
            let (a, b) = (f64::from_bits(a), f64::from_bits(b));
            let r = match op {
                F64Add => a + b,
                F64Sub => a - b,
                F64Mul => a * b,
                _ => a / b,
            };
            F64(r.to_bits())
        }
        (F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge | F64Unordered, F64(a), F64(b)) => {
            flag(compare(op, f64::from_bits(a), f64::from_bits(b)))
        }
        (op, lhs, rhs) => {
            return Err(malformed(format!("{} applied to {:?} and {:?}", op, lhs, rhs)))
        }
    })
}

fn compare(op: BinOp, a: f64, b: f64) -> bool {
    use BinOp::*;
    match op {
        F32Eq | F64Eq => a == b,
        F32Ne | F64Ne => a != b,
        F32Lt | F64Lt => a < b,
        F32Gt | F64Gt => a > b,
        F32Le | F64Le => a <= b,
        F32Ge | F64Ge => a >= b,
        _ => a.is_nan() || b.is_nan(),
    }
}

fn unop(op: UnOp, operand: IrValue) -> Result<IrValue> {
    use IrValue::{F32, F64, I32, I64};
    use UnOp::*;

    Ok(match (op, operand) {
        (I32Eqz, I32(a)) => flag(a == 0),
        (I64Eqz, I64(a)) => flag(a == 0),
        (F32Neg, F32(a)) => F32(a ^ 0x8000_0000),
        (F64Neg, F64(a)) => F64(a ^ 0x8000_0000_0000_0000),

        (I32WrapI64, I64(a)) => I32(a as i32),
        (I64ExtendI32S, I32(a)) => I64(a as i64),
        (I64ExtendI32U, I32(a)) => I64(a as u32 as i64),
        (I32Extend8S, I32(a)) => I32(a as i8 as i32),
        (I32Extend16S, I32(a)) => I32(a as i16 as i32),
        (I64Extend8S, I64(a)) => I64(a as i8 as i64),
        (I64Extend16S, I64(a)) => I64(a as i16 as i64),
        (I64Extend32S, I64(a)) => I64(a as i32 as i64),

        (I32TruncF32S, F32(a)) => I32(f32::from_bits(a) as i32),
        (I32TruncF32U, F32(a)) => I32(f32::from_bits(a) as u32 as i32),
        (I32TruncF64S, F64(a)) => I32(f64::from_bits(a) as i32),
        (I32TruncF64U, F64(a)) => I32(f64::from_bits(a) as u32 as i32),
        (I64TruncF32S, F32(a)) => I64(f32::from_bits(a) as i64),
        (I64TruncF32U, F32(a)) => I64(f32::from_bits(a) as u64 as i64),
        (I64TruncF64S, F64(a)) => I64(f64::from_bits(a) as i64),
        (I64TruncF64U, F64(a)) => I64(f64::from_bits(a) as u64 as i64),

        (F32ConvertI32S, I32(a)) => F32((a as f32).to_bits()),
        (F32ConvertI32U, I32(a)) => F32((a as u32 as f32).to_bits()),
        (F32ConvertI64S, I64(a)) => F32((a as f32).to_bits()),
        (F32ConvertI64U, I64(a)) => F32((a as u64 as f32).to_bits()),
        (F64ConvertI32S, I32(a)) => F64((a as f64).to_bits()),
        (F64ConvertI32U, I32(a)) => F64((a as u32 as f64).to_bits()),
        (F64ConvertI64S, I64(a)) => F64((a as f64).to_bits()),
        (F64ConvertI64U, I64(a)) => F64((a as u64 as f64).to_bits()),

        (F32DemoteF64, F64(a)) => F32((f64::from_bits(a) as f32).to_bits()),
        (F64PromoteF32, F32(a)) => F64((f32::from_bits(a) as f64).to_bits()),

        (I32ReinterpretF32, F32(a)) => I32(a as i32),
        (I64ReinterpretF64, F64(a)) => I64(a as i64),
        (F32ReinterpretI32, I32(a)) => F32(a as u32),
        (F64ReinterpretI64, I64(a)) => F64(a as u64),

        (op, operand) => return Err(malformed(format!("{:?} applied to {:?}", op, operand))),
    })
}

/// WebAssembly text of the sample programs under `data/`.
pub mod programs {
    pub const COLLATZ: &str = include_str!("../data/collatz.wat");
    pub const FIB: &str = include_str!("../data/fib.wat");
    pub const GCD: &str = include_str!("../data/gcd.wat");
    pub const MEMORY: &str = include_str!("../data/memory.wat");
    pub const DISPATCH: &str = include_str!("../data/dispatch.wat");
}

/// Host reference implementations of the sample programs.
pub fn collatz_steps_orig(mut n: i64) -> i32 {
    let mut steps = 0;
    while n != 1 {
        n = if n % 2 == 0 { n / 2 } else { 3 * n + 1 };
        steps += 1;
    }
    steps
}

pub fn fib_orig(n: i32) -> i32 {
    let (mut a, mut b) = (0i32, 1i32);
    for _ in 0..n {
        let t = a.wrapping_add(b);
        a = b;
        b = t;
    }
    a
}

pub fn gcd_orig(mut a: i32, mut b: i32) -> i32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binop_traps_instead_of_panicking() {
        let err = binop(BinOp::I32DivU, IrValue::I32(1), IrValue::I32(0)).unwrap_err();
        assert!(matches!(err, EvalError::Trap(TrapKind::DivByZero)));
        assert_eq!(
            binop(BinOp::I32DivS, IrValue::I32(i32::MIN), IrValue::I32(2)).unwrap(),
            IrValue::I32(i32::MIN / 2)
        );
    }

    #[test]
    fn test_float_comparisons_with_nan() {
        let nan = IrValue::F32(f32::NAN.to_bits());
        let one = IrValue::F32(1.0f32.to_bits());
        assert_eq!(binop(BinOp::F32Ne, nan, one).unwrap(), IrValue::I32(1));
        assert_eq!(binop(BinOp::F32Eq, nan, nan).unwrap(), IrValue::I32(0));
        assert_eq!(binop(BinOp::F32Unordered, one, nan).unwrap(), IrValue::I32(1));
        assert_eq!(binop(BinOp::F32Unordered, one, one).unwrap(), IrValue::I32(0));
    }

    #[test]
    fn test_wasm_min_max_signed_zero() {
        assert!(wasm_min(0.0, -0.0).is_sign_negative());
        assert!(wasm_max(-0.0, 0.0).is_sign_positive());
        assert!(wasm_min(f64::NAN, 1.0).is_nan());
    }

    #[test]
    fn test_sub_width_loads() {
        let v = load_value(
            ValType::I32,
            MemoryAccessWidth::I8,
            Some(SignExtension::Signed),
            0xff,
        )
        .unwrap();
        assert_eq!(v, IrValue::I32(-1));
        let v = load_value(
            ValType::I64,
            MemoryAccessWidth::I32,
            Some(SignExtension::Unsigned),
            0xffff_ffff,
        )
        .unwrap();
        assert_eq!(v, IrValue::I64(0xffff_ffff));
    }

    #[test]
    fn test_descriptor_addresses() {
        assert_eq!(func_of(IrValue::I64(descriptor(7) as i64)).unwrap(), 7);
        assert!(matches!(
            func_of(IrValue::I64(0)),
            Err(EvalError::Trap(TrapKind::NullReference))
        ));
    }

    #[test]
    fn test_host_references() {
        assert_eq!(collatz_steps_orig(27), 111);
        assert_eq!(fib_orig(20) % 256, 109);
        assert_eq!(gcd_orig(48, 18) + gcd_orig(252, 105), 27);
    }
}
