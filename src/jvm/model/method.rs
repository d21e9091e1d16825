use crate::jvm::class_file::{
    BytecodeArray, BytecodeIndex, Code, ConstantIndex, ExceptionHandler, Exceptions, LineNumber,
    LineNumberTable, LocalVariable, LocalVariableTable, Method,
};
use crate::jvm::code::opcodes::*;
use crate::jvm::code::{
    Anchor, ExceptionTableBuilder, InstructionStream, Label, LabelGenerator, StackCalculation,
    SwitchForm,
};
use crate::jvm::model::{ClassModel, Literal};
use crate::jvm::verifier::{Operand, Receiver, SlotType, StackEffect, StackTracker};
use crate::jvm::{
    BaseType, Error, FieldType, IllegalState, MethodAccessFlags, MethodType, RenderDescriptor,
    SymbolId, VerifierErrorKind,
};
use log::{debug, warn};

/// Name of instance initialization methods
pub const CONSTRUCTOR: &str = "<init>";

/// Type caught by `finally` handlers and by catches of several types
const THROWABLE: &str = "java/lang/Throwable";

/// Local holding the exception rethrown at the end of a catch-all handler
const PENDING_EXCEPTION: &str = "$exception";

/// Flavour of `invoke*` instruction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,

    /// Constructors, private methods, and superclass methods
    Special,
    Static,
    Interface,
}

impl InvokeKind {
    pub fn opcode(self) -> u8 {
        match self {
            InvokeKind::Virtual => INVOKEVIRTUAL,
            InvokeKind::Special => INVOKESPECIAL,
            InvokeKind::Static => INVOKESTATIC,
            InvokeKind::Interface => INVOKEINTERFACE,
        }
    }
}

#[derive(Debug, Clone)]
struct NamedVariable {
    name: String,
    field_type: FieldType,
    index: u16,
    start: Anchor,

    /// Set when the scope is closed
    end: Option<Anchor>,
}

#[derive(Debug, Default)]
struct Scope {
    variables: Vec<NamedVariable>,
}

/// Everything a method with code accumulates while its instructions are appended
struct MethodBody {
    stream: InstructionStream,
    tracker: StackTracker,
    exceptions: ExceptionTableBuilder,

    /// Named variable scopes, parameters first
    scopes: Vec<Scope>,
    closed_variables: Vec<NamedVariable>,
    line_numbers: Vec<(Anchor, u16)>,

    /// Once code or scopes are added, parameters can no longer be declared
    parameters_closed: bool,
}

impl MethodBody {
    fn new(
        stack_calculation: StackCalculation,
        class: SymbolId,
        access_flags: MethodAccessFlags,
        name: &str,
    ) -> Result<MethodBody, Error> {
        let mut body = MethodBody {
            stream: InstructionStream::new(stack_calculation),
            tracker: StackTracker::new(),
            exceptions: ExceptionTableBuilder::new(),
            scopes: vec![Scope::default()],
            closed_variables: vec![],
            line_numbers: vec![],
            parameters_closed: false,
        };
        body.tracker.push_var_frame();
        if !access_flags.is_static() {
            let this = if name == CONSTRUCTOR {
                SlotType::UninitializedThis(class)
            } else {
                SlotType::Reference(Some(class))
            };
            body.declare("this", this, FieldType::Reference(class), true)?;
        }
        Ok(body)
    }

    /// Verify and append one instruction
    fn emit(&mut self, effect: &StackEffect, bytes: &[u8]) -> Result<(), Error> {
        self.stream.check_accepting()?;
        self.or_rewind(|body| {
            let depth = body.tracker.current_stack_depth();
            body.tracker.process_changes(body.stream.pc(), effect)?;
            body.put(depth, bytes)
        })
    }

    /// Append an instruction already applied to the tracker
    fn put(&mut self, depth_before: usize, bytes: &[u8]) -> Result<(), Error> {
        let delta = self.tracker.current_stack_depth() as i32 - depth_before as i32;
        self.stream.put_command(delta, bytes)?;
        self.parameters_closed = true;
        Ok(())
    }

    /// Run `append`, putting the tracker's stack back as it was when it fails
    fn or_rewind(
        &mut self,
        append: impl FnOnce(&mut MethodBody) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let stack = self.tracker.make_stack_snapshot();
        let max_stack = self.tracker.max_stack_depth();
        let result = append(self);
        if result.is_err() {
            self.tracker.rewind_stack(&stack, max_stack);
        }
        result
    }

    fn declare(
        &mut self,
        name: &str,
        slot_type: SlotType,
        field_type: FieldType,
        is_this: bool,
    ) -> Result<u16, Error> {
        let pc = self.stream.pc();
        let scope = self
            .scopes
            .last_mut()
            .ok_or(Error::IllegalState(IllegalState::VarFrameUnderflow))?;
        if scope.variables.iter().any(|variable| variable.name == name) {
            return Err(Error::DuplicateVariable(name.to_owned()));
        }

        let index = self.tracker.add_var(slot_type, pc, is_this)?;
        let index = u16::try_from(index).map_err(|_| Error::Verifier {
            pc,
            kind: VerifierErrorKind::InvalidVarIndex(index),
        })?;
        scope.variables.push(NamedVariable {
            name: name.to_owned(),
            field_type,
            index,
            start: self.stream.mark(),
            end: None,
        });
        Ok(index)
    }

    fn lookup(&self, name: &str) -> Result<&NamedVariable, Error> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.variables.iter().rev())
            .find(|variable| variable.name == name)
            .ok_or_else(|| Error::UnknownVariable(name.to_owned()))
    }

    /// Start a handler at the next instruction, with `register` adding it to the exception table
    fn enter_handler(
        &mut self,
        caught: SymbolId,
        register: impl FnOnce(&mut ExceptionTableBuilder, Anchor) -> Result<(), Error>,
    ) -> Result<(), Error> {
        if self.exceptions.open_count() == 0 {
            return Err(Error::NoOpenTryBlock);
        }
        self.stream.check_handler_entry()?;
        let here = self.stream.mark();
        register(&mut self.exceptions, here)?;
        self.stream.enter_handler()?;
        self.tracker.prepare_catch(caught);
        Ok(())
    }

    /// Finish the code and lower it into a `Code` attribute
    fn into_code(self, class: &mut ClassModel<'_>, method: &str) -> Result<Code, Error> {
        let MethodBody {
            mut stream,
            mut tracker,
            exceptions,
            scopes,
            mut closed_variables,
            line_numbers,
            ..
        } = self;

        if scopes.len() > 1 {
            return Err(Error::IllegalState(IllegalState::ScopesNotClosed));
        }
        tracker.pop_var_frame()?;
        let rows = exceptions.finish()?;
        if !stream.is_label_required() {
            return Err(Error::Verifier {
                pc: stream.pc(),
                kind: VerifierErrorKind::FallsOffEnd,
            });
        }

        let end = stream.mark();
        for scope in scopes {
            closed_variables.extend(scope.variables.into_iter().map(|variable| NamedVariable {
                end: Some(end),
                ..variable
            }));
        }
        let code = stream.finish()?;
        let resolver = class.resolver;
        let bytecode_index = |anchor: Anchor| BytecodeIndex(code.anchor_pc(anchor) as u16);

        let mut exception_table = Vec::with_capacity(rows.len());
        for row in rows {
            let start = code.anchor_pc(row.start);
            if start == code.anchor_pc(row.end) {
                return Err(Error::EmptyProtectedRange { start });
            }
            let catch_type = match row.catch_type {
                Some(catch_type) => {
                    Some(class.constants.get_class(&resolver.class_name(catch_type)?)?)
                }
                None => None,
            };
            exception_table.push(ExceptionHandler {
                start_pc: bytecode_index(row.start),
                end_pc: bytecode_index(row.end),
                handler_pc: bytecode_index(row.handler),
                catch_type,
            });
        }

        let mut attributes = vec![];
        if class.options.emit_debug_tables {
            if !line_numbers.is_empty() {
                let lines = line_numbers
                    .iter()
                    .map(|(anchor, line)| LineNumber {
                        start_pc: bytecode_index(*anchor),
                        line_number: *line,
                    })
                    .collect();
                attributes.push(class.constants.get_attribute(LineNumberTable(lines))?);
            }

            let mut variables = Vec::with_capacity(closed_variables.len());
            for variable in &closed_variables {
                let start = code.anchor_pc(variable.start);
                let end = variable.end.map_or(code.bytes.len(), |end| code.anchor_pc(end));
                let descriptor = variable.field_type.render(resolver)?;
                variables.push(LocalVariable {
                    start_pc: BytecodeIndex(start as u16),
                    length: (end - start) as u16,
                    name_index: class.constants.get_utf8(&variable.name)?,
                    descriptor_index: class.constants.get_utf8(&descriptor)?,
                    index: variable.index,
                });
            }
            if !variables.is_empty() {
                attributes.push(class.constants.get_attribute(LocalVariableTable(variables))?);
            }
        }

        let max_stack = tracker.max_stack_depth().max(code.max_stack_estimate);
        let max_locals = tracker.max_var_slot_count();
        debug!(
            "completed {}: {} bytes, stack {}, locals {}, {} relaxation rounds, {} wide branches",
            method,
            code.bytes.len(),
            max_stack,
            max_locals,
            code.relaxation_rounds,
            code.widened_branches
        );
        Ok(Code {
            max_stack: max_stack.min(u16::MAX as usize) as u16,
            max_locals: max_locals.min(u16::MAX as usize) as u16,
            code_array: BytecodeArray(code.bytes),
            exception_table,
            attributes,
        })
    }
}

/// Method being declared on a [`ClassModel`]
///
/// Parameters are declared first, then (for methods with a body) the instructions are appended.
/// Every instruction goes through the verifier before it reaches the code, so a failing call
/// leaves the offending instruction out. Failures are fatal to the method though: the descriptor
/// should be dropped, which also makes dumping the class fail.
///
/// Nothing is added to the class until [`MethodDescriptor::complete`] succeeds.
pub struct MethodDescriptor<'c, 'r> {
    class: &'c mut ClassModel<'r>,
    access_flags: MethodAccessFlags,
    name: String,
    parameters: Vec<FieldType>,
    return_type: Option<FieldType>,
    throws: Vec<SymbolId>,

    /// Absent for abstract and native methods
    body: Option<MethodBody>,
    completed: bool,
}

impl<'c, 'r> MethodDescriptor<'c, 'r> {
    pub(crate) fn new(
        class: &'c mut ClassModel<'r>,
        class_symbol: SymbolId,
        access_flags: MethodAccessFlags,
        name: &str,
        return_type: Option<FieldType>,
        throws: Vec<SymbolId>,
    ) -> Result<MethodDescriptor<'c, 'r>, Error> {
        let body = if access_flags.has_body() {
            let stack_calculation = class.options.stack_calculation;
            Some(MethodBody::new(stack_calculation, class_symbol, access_flags, name)?)
        } else {
            None
        };
        Ok(MethodDescriptor {
            class,
            access_flags,
            name: name.to_owned(),
            parameters: vec![],
            return_type,
            throws,
            body,
            completed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_type(&self) -> MethodType {
        MethodType {
            parameters: self.parameters.clone(),
            return_type: self.return_type,
        }
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Provisional program counter of the next instruction
    pub fn pc(&self) -> Result<usize, Error> {
        Ok(self.body_ref()?.stream.pc())
    }

    pub fn current_stack_depth(&self) -> Result<usize, Error> {
        Ok(self.body_ref()?.tracker.current_stack_depth())
    }

    pub fn max_stack_depth(&self) -> Result<usize, Error> {
        Ok(self.body_ref()?.tracker.max_stack_depth())
    }

    /// Type of the stack slot at `offset_from_top` (0 is the top)
    pub fn stack_item_type(&self, offset_from_top: usize) -> Result<SlotType, Error> {
        let body = self.body_ref()?;
        body.tracker
            .select_stack_item_type(offset_from_top)
            .map_err(|kind| Error::Verifier {
                pc: body.stream.pc(),
                kind,
            })
    }

    /// Declare the next parameter, returning its variable index
    pub fn add_parameter(&mut self, name: &str, field_type: FieldType) -> Result<u16, Error> {
        let index = self
            .method_type()
            .parameter_length(!self.access_flags.is_static());
        if let Some(body) = self.body.as_mut() {
            if body.parameters_closed {
                return Err(Error::IllegalState(IllegalState::ParametersClosed));
            }
            let index = body.declare(name, field_type.slot_type(), field_type, false)?;
            body.tracker.assign_var(index as usize);
        }
        self.parameters.push(field_type);
        Ok(index as u16)
    }

    /// Open a nested variable scope
    pub fn push_scope(&mut self) -> Result<(), Error> {
        let body = self.body_mut()?;
        body.parameters_closed = true;
        body.tracker.push_var_frame();
        body.scopes.push(Scope::default());
        Ok(())
    }

    /// Close the innermost variable scope (the parameters can't be closed)
    pub fn pop_scope(&mut self) -> Result<(), Error> {
        let body = self.body_mut()?;
        if body.scopes.len() <= 1 {
            return Err(Error::IllegalState(IllegalState::VarFrameUnderflow));
        }
        body.tracker.pop_var_frame()?;
        let end = body.stream.mark();
        if let Some(scope) = body.scopes.pop() {
            body.closed_variables
                .extend(scope.variables.into_iter().map(|variable| NamedVariable {
                    end: Some(end),
                    ..variable
                }));
        }
        Ok(())
    }

    /// Declare a variable in the innermost scope, returning its index
    ///
    /// Unlike a parameter, the variable holds nothing until it is stored: closing its scope (or
    /// completing the method) fails if it is loaded without being stored anywhere.
    pub fn add_variable(&mut self, name: &str, field_type: FieldType) -> Result<u16, Error> {
        let body = self.body_mut()?;
        body.parameters_closed = true;
        body.declare(name, field_type.slot_type(), field_type, false)
    }

    /// Index of the innermost variable with this name
    pub fn variable_index(&self, name: &str) -> Result<u16, Error> {
        Ok(self.body_ref()?.lookup(name)?.index)
    }

    /// Map the next instruction to a source line
    pub fn line_number(&mut self, line: u16) -> Result<(), Error> {
        let body = self.body_mut()?;
        let here = body.stream.mark();
        body.line_numbers.push((here, line));
        Ok(())
    }

    pub fn declare_label(&mut self, label: Label) -> Result<(), Error> {
        self.body_mut()?.stream.declare_label(label)
    }

    /// Declare a label no one else uses
    pub fn fresh_label(&mut self) -> Result<Label, Error> {
        Ok(self.body_mut()?.stream.fresh_label())
    }

    /// Place a label at the next instruction
    pub fn place_label(&mut self, label: Label) -> Result<(), Error> {
        let body = self.body_mut()?;
        let current = body.tracker.make_stack_snapshot();
        let snapshot = body.stream.put_label(label, current)?;
        body.tracker.load_stack_snapshot(&snapshot);
        Ok(())
    }

    /// Append an arbitrary instruction with its stack effect
    ///
    /// Branches and switches cannot be appended this way, since their offsets must be resolved.
    pub fn put_command(&mut self, effect: &StackEffect, bytes: &[u8]) -> Result<(), Error> {
        if let Some(opcode) = bytes.first() {
            if is_short_branch(*opcode)
                || matches!(*opcode, GOTO_W | JSR_W | TABLESWITCH | LOOKUPSWITCH)
            {
                return Err(Error::UnexpectedOpcode(*opcode));
            }
        }
        self.body_mut()?.emit(effect, bytes)
    }

    /// Append an instruction without operands (arithmetic, conversions, array accesses, stack
    /// manipulation, returns, `athrow`, ...)
    pub fn op(&mut self, opcode: u8) -> Result<(), Error> {
        let effect = simple_effect(opcode).ok_or(Error::UnexpectedOpcode(opcode))?;
        if (IRETURN..=RETURN).contains(&opcode)
            && opcode != return_opcode(self.return_type.as_ref())
        {
            return Err(Error::Verifier {
                pc: self.pc()?,
                kind: VerifierErrorKind::WrongReturn(opcode),
            });
        }
        self.body_mut()?.emit(&effect, &[opcode])
    }

    /// Return from the method, with the return instruction matching its return type
    pub fn emit_return(&mut self) -> Result<(), Error> {
        self.op(return_opcode(self.return_type.as_ref()))
    }

    /// Push an integer constant, with the shortest suitable instruction
    pub fn iconst(&mut self, value: i32) -> Result<(), Error> {
        let effect = StackEffect::Push(SlotType::Int);
        if (-1..=5).contains(&value) {
            self.body_mut()?
                .emit(&effect, &[(ICONST_0 as i32 + value) as u8])
        } else if let Ok(byte) = i8::try_from(value) {
            self.body_mut()?.emit(&effect, &[BIPUSH, byte as u8])
        } else if let Ok(short) = i16::try_from(value) {
            let [high, low] = short.to_be_bytes();
            self.body_mut()?.emit(&effect, &[SIPUSH, high, low])
        } else {
            self.ldc(Literal::Int(value))
        }
    }

    /// Push a constant from the constant pool
    pub fn ldc(&mut self, literal: Literal) -> Result<(), Error> {
        self.body_mut()?.stream.check_accepting()?;
        let slot_type = match &literal {
            Literal::Int(_) => SlotType::Int,
            Literal::Float(_) => SlotType::Float,
            Literal::Long(_) => SlotType::Long,
            Literal::Double(_) => SlotType::Double,
            Literal::String(_) => {
                let string = self.class.resolver.intern_name("java/lang/String");
                SlotType::Reference(Some(string))
            }
        };
        let ConstantIndex(index) = literal.constant_index(&mut self.class.constants)?;
        let [high, low] = index.to_be_bytes();
        let bytes = if literal.is_wide() {
            vec![LDC2_W, high, low]
        } else if high == 0 {
            vec![LDC, low]
        } else {
            vec![LDC_W, high, low]
        };
        self.body_mut()?.emit(&StackEffect::Push(slot_type), &bytes)
    }

    /// Load a local variable (`iload`, `aload`, ...)
    pub fn load(&mut self, operand: Operand, index: u16) -> Result<(), Error> {
        let body = self.body_mut()?;
        body.stream.check_accepting()?;
        let depth = body.tracker.current_stack_depth();
        body.tracker
            .load_var(body.stream.pc(), index as usize, operand)?;
        body.put(depth, &var_instruction(operand, index, false))
    }

    /// Store into a local variable (`istore`, `astore`, ...)
    pub fn store(&mut self, operand: Operand, index: u16) -> Result<(), Error> {
        let body = self.body_mut()?;
        body.stream.check_accepting()?;
        let depth = body.tracker.current_stack_depth();
        body.tracker
            .store_var(body.stream.pc(), index as usize, operand)?;
        body.put(depth, &var_instruction(operand, index, true))
    }

    /// Load a variable by name, with the load matching its declared type
    pub fn load_variable(&mut self, name: &str) -> Result<(), Error> {
        let variable = self.body_ref()?.lookup(name)?;
        let (operand, index) = (variable.field_type.operand(), variable.index);
        self.load(operand, index)
    }

    /// Store a variable by name, with the store matching its declared type
    pub fn store_variable(&mut self, name: &str) -> Result<(), Error> {
        let variable = self.body_ref()?.lookup(name)?;
        let (operand, index) = (variable.field_type.operand(), variable.index);
        self.store(operand, index)
    }

    pub fn iinc(&mut self, index: u16, delta: i16) -> Result<(), Error> {
        let bytes = match (u8::try_from(index), i8::try_from(delta)) {
            (Ok(index), Ok(delta)) => vec![IINC, index, delta as u8],
            _ => {
                let [index_high, index_low] = index.to_be_bytes();
                let [delta_high, delta_low] = delta.to_be_bytes();
                vec![WIDE, IINC, index_high, index_low, delta_high, delta_low]
            }
        };
        let body = self.body_mut()?;
        body.stream.check_accepting()?;
        let depth = body.tracker.current_stack_depth();
        body.tracker
            .increment_var(body.stream.pc(), index as usize)?;
        body.put(depth, &bytes)
    }

    /// Jump to the address stored in a variable by `jsr`/`astore`
    pub fn ret(&mut self, index: u16) -> Result<(), Error> {
        let body = self.body_mut()?;
        body.stream.check_accepting()?;
        let pc = body.stream.pc();
        let wrap = |kind| Error::Verifier { pc, kind };
        let found = body.tracker.get_var_type(index as usize).map_err(wrap)?;
        if found != SlotType::ReturnAddress {
            return Err(wrap(VerifierErrorKind::InvalidVarType {
                index: index as usize,
                expected: Operand::ReturnAddress,
                found,
            }));
        }

        let bytes = match u8::try_from(index) {
            Ok(index) => vec![RET, index],
            Err(_) => {
                let [high, low] = index.to_be_bytes();
                vec![WIDE, RET, high, low]
            }
        };
        let depth = body.tracker.current_stack_depth();
        body.put(depth, &bytes)
    }

    /// Append a branch (`goto`, `jsr`, `if*`) to a label
    ///
    /// Branches start out short and are widened automatically when the method is completed.
    pub fn branch(&mut self, opcode: u8, label: Label) -> Result<(), Error> {
        let body = self.body_mut()?;
        body.stream.check_accepting()?;
        let pc = body.stream.pc();
        body.or_rewind(|body| {
            let snapshot = match opcode {
                GOTO | GOTO_W => body.tracker.make_stack_snapshot(),
                JSR | JSR_W => {
                    // The return address is only on the stack at the subroutine
                    body.tracker
                        .process_changes(pc, &StackEffect::Push(SlotType::ReturnAddress))?;
                    let snapshot = body.tracker.make_stack_snapshot();
                    body.tracker.process_changes(pc, &StackEffect::Pop(1))?;
                    snapshot
                }
                _ => {
                    let operands =
                        condition_operands(opcode).ok_or(Error::UnexpectedOpcode(opcode))?;
                    let effect = StackEffect::Operate {
                        operands,
                        result: None,
                    };
                    body.tracker.process_changes(pc, &effect)?;
                    body.tracker.make_stack_snapshot()
                }
            };
            body.stream.register_branch(opcode, label, true, snapshot)?;
            body.parameters_closed = true;
            Ok(())
        })
    }

    pub fn goto(&mut self, label: Label) -> Result<(), Error> {
        self.branch(GOTO, label)
    }

    /// Switch on the `int` on top of the stack, picking the table or lookup form by density
    pub fn switch(&mut self, pairs: &[(i32, Label)], default: Label) -> Result<(), Error> {
        self.put_switch(SwitchForm::Auto, pairs, default)
    }

    pub fn table_switch(&mut self, pairs: &[(i32, Label)], default: Label) -> Result<(), Error> {
        self.put_switch(SwitchForm::Table, pairs, default)
    }

    pub fn lookup_switch(&mut self, pairs: &[(i32, Label)], default: Label) -> Result<(), Error> {
        self.put_switch(SwitchForm::Lookup, pairs, default)
    }

    fn put_switch(
        &mut self,
        form: SwitchForm,
        pairs: &[(i32, Label)],
        default: Label,
    ) -> Result<(), Error> {
        let body = self.body_mut()?;
        body.stream.check_accepting()?;
        let effect = StackEffect::Operate {
            operands: &[Operand::Int],
            result: None,
        };
        body.or_rewind(|body| {
            body.tracker.process_changes(body.stream.pc(), &effect)?;
            let snapshot = body.tracker.make_stack_snapshot();
            body.stream.put_switch(form, pairs, default, snapshot)?;
            body.parameters_closed = true;
            Ok(())
        })
    }

    pub fn get_field(&mut self, field: SymbolId) -> Result<(), Error> {
        self.field_access(GETFIELD, field)
    }

    pub fn put_field(&mut self, field: SymbolId) -> Result<(), Error> {
        self.field_access(PUTFIELD, field)
    }

    pub fn get_static(&mut self, field: SymbolId) -> Result<(), Error> {
        self.field_access(GETSTATIC, field)
    }

    pub fn put_static(&mut self, field: SymbolId) -> Result<(), Error> {
        self.field_access(PUTSTATIC, field)
    }

    fn field_access(&mut self, opcode: u8, field: SymbolId) -> Result<(), Error> {
        self.body_mut()?.stream.check_accepting()?;
        let resolver = self.class.resolver;
        let signature = resolver.resolve_field_signature(field)?;
        let owner = resolver.class_name(signature.owner)?;
        let descriptor = signature.field_type.render(resolver)?;

        let constants = &mut self.class.constants;
        let class = constants.get_class(&owner)?;
        let name_and_type = constants.get_name_and_type(&signature.name, &descriptor)?;
        let field_ref = constants.get_field_ref(class, name_and_type)?;

        let field_type = signature.field_type;
        let effect = match opcode {
            GETFIELD => StackEffect::PushField(field_type),
            PUTFIELD => StackEffect::PopField(field_type),
            GETSTATIC => StackEffect::PushStatic(field_type),
            _ => StackEffect::PopStatic(field_type),
        };
        let [high, low] = index_bytes(field_ref);
        self.body_mut()?.emit(&effect, &[opcode, high, low])
    }

    /// Call a method
    ///
    /// `invokespecial` of a method named `<init>` is a constructor call: it initializes the
    /// receiver, everywhere it was copied to.
    pub fn invoke(&mut self, kind: InvokeKind, method: SymbolId) -> Result<(), Error> {
        self.body_mut()?.stream.check_accepting()?;
        let resolver = self.class.resolver;
        let signature = resolver.resolve_method_signature(method)?;
        let owner = resolver.class_name(signature.owner)?;
        let descriptor = signature.descriptor.render(resolver)?;

        let constants = &mut self.class.constants;
        let class = constants.get_class(&owner)?;
        let name_and_type = constants.get_name_and_type(&signature.name, &descriptor)?;
        let method_ref =
            constants.get_method_ref(class, name_and_type, signature.owner_is_interface)?;

        let receiver = match kind {
            InvokeKind::Static => Receiver::Static,
            InvokeKind::Special if signature.name == CONSTRUCTOR => Receiver::Constructor,
            _ => Receiver::Instance,
        };
        let [high, low] = index_bytes(method_ref);
        let bytes = match kind {
            InvokeKind::Interface => {
                let count = signature.descriptor.parameter_length(true) as u8;
                vec![INVOKEINTERFACE, high, low, count, 0]
            }
            _ => vec![kind.opcode(), high, low],
        };
        let effect = StackEffect::Call {
            parameters: signature.descriptor.parameters,
            return_type: signature.descriptor.return_type,
            receiver,
        };
        self.body_mut()?.emit(&effect, &bytes)
    }

    /// `new`: push an uninitialized instance
    pub fn new_object(&mut self, class: SymbolId) -> Result<(), Error> {
        let bytes = self.class_instruction(NEW, class)?;
        self.body_mut()?
            .emit(&StackEffect::Push(SlotType::Uninitialized(class)), &bytes)
    }

    /// `newarray`: array of primitives, with the length on the stack
    pub fn new_array(&mut self, element: BaseType) -> Result<(), Error> {
        self.body_mut()?.stream.check_accepting()?;
        let array_name = format!("[{}", element.descriptor_char());
        let array = self.class.resolver.intern_name(&array_name);
        let effect = StackEffect::Operate {
            operands: &[Operand::Int],
            result: Some(SlotType::Reference(Some(array))),
        };
        self.body_mut()?
            .emit(&effect, &[NEWARRAY, element.array_type_code()])
    }

    /// `anewarray`: array of references, with the length on the stack
    pub fn anewarray(&mut self, element: SymbolId) -> Result<(), Error> {
        let bytes = self.class_instruction(ANEWARRAY, element)?;
        let resolver = self.class.resolver;
        let array_name = format!("[{}", FieldType::Reference(element).render(resolver)?);
        let effect = StackEffect::Operate {
            operands: &[Operand::Int],
            result: Some(SlotType::Reference(Some(resolver.intern_name(&array_name)))),
        };
        self.body_mut()?.emit(&effect, &bytes)
    }

    /// `multianewarray`: array class, with one length per dimension on the stack
    pub fn multianewarray(&mut self, array: SymbolId, dimensions: u8) -> Result<(), Error> {
        let mut bytes = self.class_instruction(MULTIANEWARRAY, array)?;
        bytes.push(dimensions);
        let effect = StackEffect::MultiArray {
            dimensions,
            class: array,
        };
        self.body_mut()?.emit(&effect, &bytes)
    }

    pub fn checkcast(&mut self, class: SymbolId) -> Result<(), Error> {
        let bytes = self.class_instruction(CHECKCAST, class)?;
        self.body_mut()?.emit(&StackEffect::ChangeType(class), &bytes)
    }

    pub fn instanceof(&mut self, class: SymbolId) -> Result<(), Error> {
        let bytes = self.class_instruction(INSTANCEOF, class)?;
        let effect = StackEffect::Operate {
            operands: &[Operand::Reference],
            result: Some(SlotType::Int),
        };
        self.body_mut()?.emit(&effect, &bytes)
    }

    /// Opcode followed by a class constant index
    fn class_instruction(&mut self, opcode: u8, class: SymbolId) -> Result<Vec<u8>, Error> {
        self.body_mut()?.stream.check_accepting()?;
        let name = self.class.resolver.class_name(class)?;
        let [high, low] = index_bytes(self.class.constants.get_class(&name)?);
        Ok(vec![opcode, high, low])
    }

    /// Start a protected range at the next instruction
    pub fn begin_try(&mut self) -> Result<(), Error> {
        let body = self.body_mut()?;
        let start = body.stream.mark();
        body.exceptions.begin_try(start);
        Ok(())
    }

    /// Start a handler for the given exception types at the next instruction
    ///
    /// The first handler of a `try` ends its protected range. At the handler, the stack holds
    /// only the caught exception (typed as `Throwable` when several types are caught). The
    /// previous instruction must not fall through into the handler.
    pub fn catch(&mut self, types: &[SymbolId]) -> Result<(), Error> {
        let resolver = self.class.resolver;
        for catch_type in types {
            resolver.class_name(*catch_type)?;
        }
        let caught = match types {
            [single] => *single,
            _ => resolver.intern_name(THROWABLE),
        };

        self.body_mut()?.enter_handler(caught, |exceptions, here| {
            exceptions.process_catch(types, here)
        })
    }

    /// Start the catch-all handler at the next instruction
    ///
    /// The handler receives any exception thrown in the protected range. Running the `finally`
    /// code and rethrowing is up to the instructions that follow.
    pub fn finally(&mut self) -> Result<(), Error> {
        let throwable = self.class.resolver.intern_name(THROWABLE);
        self.body_mut()?
            .enter_handler(throwable, |exceptions, here| exceptions.process_finally(here))
    }

    /// Close the innermost `try`
    pub fn end_try(&mut self) -> Result<(), Error> {
        self.body_mut()?.exceptions.process_end().map(|_| ())
    }

    /// Emit a whole `try`/`catch`/`finally` statement
    ///
    /// `body` emits the protected code and `handler` the code of each catch clause, called with
    /// the clause's position in `catches`. A copy of the `finally` code is emitted wherever
    /// control leaves the statement normally: after the body and after every handler that does
    /// not end in a jump. One more copy sits in the catch-all handler, which saves the pending
    /// exception in a fresh local and rethrows it afterwards. The copies on the normal paths are
    /// outside the protected range.
    pub fn try_catch_finally(
        &mut self,
        catches: &[&[SymbolId]],
        body: &mut dyn FnMut(&mut Self) -> Result<(), Error>,
        handler: &mut dyn FnMut(&mut Self, usize) -> Result<(), Error>,
        finally: &mut dyn FnMut(&mut Self) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut exit = None;
        self.begin_try()?;
        body(self)?;
        let body_end = self.body_mut()?.stream.mark();
        self.body_mut()?.exceptions.end_protected_range(body_end)?;

        self.leave_through_finally(&mut exit, finally)?;
        for (index, types) in catches.iter().enumerate() {
            self.catch(types)?;
            handler(self, index)?;
            self.leave_through_finally(&mut exit, finally)?;
        }

        self.finally()?;
        self.push_scope()?;
        let throwable = FieldType::object(self.class.resolver.intern_name(THROWABLE));
        let pending = self.add_variable(PENDING_EXCEPTION, throwable)?;
        self.store(Operand::Reference, pending)?;
        finally(self)?;
        if !self.body_ref()?.stream.is_label_required() {
            self.load(Operand::Reference, pending)?;
            self.op(ATHROW)?;
        }
        self.pop_scope()?;
        self.end_try()?;

        match exit {
            Some(exit) => self.place_label(exit),
            None => Ok(()),
        }
    }

    /// Copy of the `finally` code on a normal exit, then a jump past the statement
    ///
    /// The label after the statement is only created once something jumps to it.
    fn leave_through_finally(
        &mut self,
        exit: &mut Option<Label>,
        finally: &mut dyn FnMut(&mut Self) -> Result<(), Error>,
    ) -> Result<(), Error> {
        if self.body_ref()?.stream.is_label_required() {
            return Ok(());
        }
        finally(self)?;
        if self.body_ref()?.stream.is_label_required() {
            return Ok(());
        }
        let label = match *exit {
            Some(label) => label,
            None => *exit.insert(self.fresh_label()?),
        };
        self.goto(label)
    }

    /// Finish the method and add it to the class
    ///
    /// This resolves every branch, lays out the exception table and debug tables, and computes
    /// the max stack and locals.
    pub fn complete(mut self) -> Result<(), Error> {
        let result = self.finish();
        self.completed = result.is_ok();
        result
    }

    fn finish(&mut self) -> Result<(), Error> {
        let resolver = self.class.resolver;
        let descriptor = self.method_type().render(resolver)?;
        let key = (self.name.clone(), descriptor);
        if self.class.method_keys.contains(&key) {
            return Err(Error::DuplicateMember(format!("{}{}", key.0, key.1)));
        }

        let mut attributes = vec![];
        if let Some(body) = self.body.take() {
            let code = body.into_code(self.class, &self.name)?;
            attributes.push(self.class.constants.get_attribute(code)?);
        }
        if !self.throws.is_empty() {
            let mut exceptions = Vec::with_capacity(self.throws.len());
            for exception in &self.throws {
                let name = resolver.class_name(*exception)?;
                exceptions.push(self.class.constants.get_class(&name)?);
            }
            attributes.push(self.class.constants.get_attribute(Exceptions(exceptions))?);
        }

        let method = Method {
            access_flags: self.access_flags,
            name_index: self.class.constants.get_utf8(&key.0)?,
            descriptor_index: self.class.constants.get_utf8(&key.1)?,
            attributes,
        };
        self.class.methods.push(method);
        self.class.method_keys.insert(key);
        Ok(())
    }

    fn body_ref(&self) -> Result<&MethodBody, Error> {
        self.body
            .as_ref()
            .ok_or(Error::IllegalState(IllegalState::MethodHasNoBody))
    }

    fn body_mut(&mut self) -> Result<&mut MethodBody, Error> {
        self.body
            .as_mut()
            .ok_or(Error::IllegalState(IllegalState::MethodHasNoBody))
    }
}

impl Drop for MethodDescriptor<'_, '_> {
    fn drop(&mut self) {
        if !self.completed {
            warn!("method {} was dropped without being completed", self.name);
            self.class.incomplete_methods.push(self.name.clone());
        }
    }
}

fn index_bytes(index: impl Into<ConstantIndex>) -> [u8; 2] {
    index.into().0.to_be_bytes()
}

/// Shortest encoding of a variable load or store
fn var_instruction(operand: Operand, index: u16, is_store: bool) -> Vec<u8> {
    let (generic, first_short) = var_opcodes(operand, is_store);
    match index {
        0..=3 => vec![first_short + index as u8],
        4..=255 => vec![generic, index as u8],
        _ => {
            let [high, low] = index.to_be_bytes();
            vec![WIDE, generic, high, low]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::{ClassAccessFlags, SymbolResolver, SymbolTable};

    fn class_named<'r>(symbols: &'r SymbolTable, name: &str) -> Result<ClassModel<'r>, Error> {
        let mut class = ClassModel::new(symbols);
        class.set_class_name(ClassAccessFlags::PUBLIC, symbols.intern_name(name))?;
        Ok(class)
    }

    fn public_static() -> MethodAccessFlags {
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC
    }

    #[test]
    fn variable_instruction_forms() {
        assert_eq!(var_instruction(Operand::Int, 2, false), vec![ILOAD_0 + 2]);
        assert_eq!(var_instruction(Operand::Double, 9, true), vec![DSTORE, 9]);
        assert_eq!(
            var_instruction(Operand::Reference, 300, false),
            vec![WIDE, ALOAD, 0x01, 0x2c]
        );
    }

    #[test]
    fn add_two_ints() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let mut class = class_named(&symbols, "Adder")?;
        let mut method =
            class.add_method_description(public_static(), "add", Some(FieldType::int()), &[])?;
        let a = method.add_parameter("a", FieldType::int())?;
        let b = method.add_parameter("b", FieldType::int())?;
        assert_eq!((a, b), (0, 1));

        method.load(Operand::Int, a)?;
        method.load_variable("b")?;
        assert_eq!(method.current_stack_depth()?, 2);
        method.op(IADD)?;
        method.emit_return()?;
        method.complete()?;

        let class_file = class.to_class_file()?;
        assert_eq!(class_file.methods.len(), 1);
        Ok(())
    }

    #[test]
    fn verification_errors_carry_the_pc() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let mut class = class_named(&symbols, "Broken")?;
        let mut method = class.add_method_description(public_static(), "f", None, &[])?;

        method.iconst(1)?;
        method.ldc(Literal::Long(1 << 40))?;
        let result = method.op(IADD);
        assert!(matches!(
            result,
            Err(Error::Verifier {
                pc: 4,
                kind: VerifierErrorKind::InvalidType { .. }
            })
        ));
        assert!(matches!(
            method.op(IRETURN),
            Err(Error::Verifier {
                kind: VerifierErrorKind::WrongReturn(IRETURN),
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn dropped_method_poisons_the_class() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let mut class = class_named(&symbols, "Poisoned")?;
        {
            let mut method = class.add_method_description(public_static(), "f", None, &[])?;
            let missing = method.fresh_label()?;
            method.goto(missing)?;
            assert!(matches!(
                method.complete(),
                Err(Error::UnresolvedLabels(_))
            ));
        }
        let mut bytes = vec![];
        assert!(matches!(
            class.dump(&mut bytes),
            Err(Error::IncompleteMethod(name)) if name == "f"
        ));
        assert!(bytes.is_empty());
        Ok(())
    }

    #[test]
    fn falling_off_the_end() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let mut class = class_named(&symbols, "Fall")?;
        let mut method = class.add_method_description(public_static(), "f", None, &[])?;
        method.op(NOP)?;
        assert!(matches!(
            method.complete(),
            Err(Error::Verifier {
                pc: 1,
                kind: VerifierErrorKind::FallsOffEnd
            })
        ));
        Ok(())
    }

    #[test]
    fn parameters_come_first() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let mut class = class_named(&symbols, "Params")?;
        let mut method =
            class.add_method_description(MethodAccessFlags::PUBLIC, "f", None, &[])?;
        assert_eq!(method.add_parameter("wide", FieldType::long())?, 1);
        assert_eq!(method.add_parameter("narrow", FieldType::int())?, 3);
        assert!(matches!(
            method.add_parameter("wide", FieldType::int()),
            Err(Error::DuplicateVariable(_))
        ));

        method.push_scope()?;
        assert!(matches!(
            method.add_parameter("late", FieldType::int()),
            Err(Error::IllegalState(IllegalState::ParametersClosed))
        ));
        assert_eq!(method.add_variable("wide", FieldType::int())?, 4);
        assert_eq!(method.variable_index("wide")?, 4);
        assert_eq!(method.variable_index("this")?, 0);
        method.pop_scope()?;
        assert_eq!(method.variable_index("wide")?, 1);
        assert!(matches!(
            method.pop_scope(),
            Err(Error::IllegalState(IllegalState::VarFrameUnderflow))
        ));
        assert!(matches!(
            method.variable_index("nope"),
            Err(Error::UnknownVariable(_))
        ));
        method.emit_return()?;
        method.complete()
    }

    #[test]
    fn abstract_methods_have_no_body() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let mut class = class_named(&symbols, "Shape")?;
        let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT;
        let mut method =
            class.add_method_description(flags, "area", Some(FieldType::double()), &[])?;
        assert_eq!(method.add_parameter("scale", FieldType::int())?, 1);
        assert!(matches!(
            method.op(NOP),
            Err(Error::IllegalState(IllegalState::MethodHasNoBody))
        ));
        method.complete()?;

        let class_file = class.to_class_file()?;
        assert!(class_file.methods[0].attributes.is_empty());
        Ok(())
    }

    #[test]
    fn duplicate_methods() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let mut class = class_named(&symbols, "Twice")?;
        for _ in 0..2 {
            let mut method = class.add_method_description(public_static(), "f", None, &[])?;
            method.emit_return()?;
            if let Err(error) = method.complete() {
                assert!(matches!(error, Error::DuplicateMember(name) if name == "f()V"));
                return Ok(());
            }
        }
        panic!("second method was accepted");
    }

    #[test]
    fn constructor_initializes_this() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let object = symbols.intern_name("java.lang.Object");
        let init = symbols.declare_method(
            object,
            CONSTRUCTOR,
            MethodType {
                parameters: vec![],
                return_type: None,
            },
        )?;
        let mut class = class_named(&symbols, "Thing")?;
        let mut method =
            class.add_method_description(MethodAccessFlags::PUBLIC, CONSTRUCTOR, None, &[])?;

        method.load(Operand::Reference, 0)?;
        assert!(matches!(
            method.stack_item_type(0)?,
            SlotType::UninitializedThis(_)
        ));
        method.invoke(InvokeKind::Special, init)?;
        method.load(Operand::Reference, 0)?;
        assert!(matches!(method.stack_item_type(0)?, SlotType::Reference(Some(_))));
        method.op(POP)?;
        method.emit_return()?;
        method.complete()
    }

    #[test]
    fn exception_rows_are_resolved() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let io = symbols.intern_name("java.io.IOException");
        let mut class = class_named(&symbols, "Guarded")?;
        let mut method = class.add_method_description(public_static(), "f", None, &[io])?;
        let end = method.fresh_label()?;

        method.begin_try()?;
        method.op(NOP)?;
        method.goto(end)?;
        method.catch(&[io])?;
        assert_eq!(method.current_stack_depth()?, 1);
        method.op(POP)?;
        method.goto(end)?;
        method.finally()?;
        method.op(ATHROW)?;
        method.end_try()?;
        method.place_label(end)?;
        method.emit_return()?;
        method.complete()?;

        let class_file = class.to_class_file()?;
        // Code and Exceptions
        assert_eq!(class_file.methods[0].attributes.len(), 2);
        Ok(())
    }

    #[test]
    fn empty_protected_range() -> Result<(), Error> {
        let symbols = SymbolTable::new();
        let mut class = class_named(&symbols, "Empty")?;
        let mut method = class.add_method_description(public_static(), "f", None, &[])?;
        method.op(ACONST_NULL)?;
        method.op(ATHROW)?;
        method.begin_try()?;
        method.finally()?;
        method.op(ATHROW)?;
        method.end_try()?;
        assert!(matches!(
            method.complete(),
            Err(Error::EmptyProtectedRange { start: 2 })
        ));
        Ok(())
    }
}
