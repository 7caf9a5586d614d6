mod error;
mod event;
mod host;
mod pool;

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, error, warn};

use crate::{
    bytecode::{
        reader::{
            decode_expr, decode_statement, ChoiceItemCode, ExprNode, HashPair, LineCode, Segment,
            SpeakerSlot,
        },
        section_table, CodeReadError, ExprCode, ScriptData, Statement,
    },
    text::{interpolate, TextTag},
    value::Variant,
};

pub use error::RuntimeError;
pub use event::{Choice, DialogEvent};
pub use host::{AsyncCall, HostBinding, HostError, MemoryHost};
pub use pool::VecPool;

use error::host_fault;

const POOL_LIMIT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RuntimeState {
    Idle,
    Running,
    AwaitingChoice,
    AwaitingAsyncCall,
    Ended,
}

/// Why a statement stopped before finishing.
enum Interrupt {
    /// An awaited host call has not completed; the statement is replayed once
    /// it has.
    Pending,
    Fault(RuntimeError),
}

impl From<RuntimeError> for Interrupt {
    fn from(error: RuntimeError) -> Self {
        Self::Fault(error)
    }
}
impl From<CodeReadError> for Interrupt {
    fn from(error: CodeReadError) -> Self {
        Self::Fault(error.into())
    }
}

enum Flow {
    Continue,
    Suspend,
}

/// Inclusion state of one `if` filter inside a choice block.
struct Filter {
    enclosing: bool,
    taken: bool,
    active: bool,
}

/// Plays a compiled script against a host, one suspension point at a time.
///
/// A statement is evaluated in full before any of its events are emitted. If
/// an awaited call suspends it, the statement is replayed after completion;
/// the results of calls and assignments that already ran are remembered by
/// stream offset, so each runs once.
pub struct Runtime<'s> {
    script: &'s ScriptData,
    sections: HashMap<String, usize>,
    state: RuntimeState,
    pointer: usize,
    /// Set by an `[end]` tag; the script ends on the next advance.
    ending: bool,
    choices: Vec<Choice>,
    pending_call: Option<(usize, String)>,
    memo: HashMap<usize, Variant>,
    event_pool: VecPool<DialogEvent>,
    choice_pool: VecPool<Choice>,
}

impl<'s> Runtime<'s> {
    pub fn new(script: &'s ScriptData) -> Result<Self, RuntimeError> {
        Ok(Self {
            script,
            sections: section_table(script)?,
            state: RuntimeState::Idle,
            pointer: 0,
            ending: false,
            choices: Vec::new(),
            pending_call: None,
            memo: HashMap::new(),
            event_pool: VecPool::new(POOL_LIMIT),
            choice_pool: VecPool::new(POOL_LIMIT),
        })
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }
    pub fn pointer(&self) -> usize {
        self.pointer
    }
    /// The options of the choice awaiting selection.
    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }
    /// Name of the host function whose completion is awaited.
    pub fn pending_function(&self) -> Option<&str> {
        self.pending_call.as_ref().map(|(_, name)| name.as_str())
    }
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn start_script(&mut self, name: &str) -> Result<(), RuntimeError> {
        if self.state == RuntimeState::AwaitingAsyncCall {
            return Err(RuntimeError::InvalidState {
                operation: "start a script",
                state: self.state,
            });
        }
        let entry = self.section(name)?;
        debug!(section = name, entry, "starting script");
        let choices = std::mem::take(&mut self.choices);
        self.choice_pool.give(choices);
        self.ending = false;
        self.state = RuntimeState::Running;
        self.jump(entry);
        Ok(())
    }

    /// Runs until the next suspension point and returns the events produced
    /// on the way. A fault ends the playthrough.
    pub fn advance<H: HostBinding + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> Result<Vec<DialogEvent>, RuntimeError> {
        if self.state != RuntimeState::Running {
            return Err(RuntimeError::InvalidState {
                operation: "advance",
                state: self.state,
            });
        }
        let mut events = self.event_pool.take();
        loop {
            match self.step(host, &mut events) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Suspend) => return Ok(events),
                Err(Interrupt::Pending) => return Ok(events),
                Err(Interrupt::Fault(fault)) => {
                    error!(pointer = self.pointer, "dialog fault: {}", fault);
                    self.state = RuntimeState::Ended;
                    self.pending_call = None;
                    self.memo.clear();
                    self.event_pool.give(events);
                    return Err(fault);
                }
            }
        }
    }

    pub fn select_choice(&mut self, index: usize) -> Result<(), RuntimeError> {
        if self.state != RuntimeState::AwaitingChoice {
            return Err(RuntimeError::InvalidState {
                operation: "select a choice",
                state: self.state,
            });
        }
        let choice = self.choices.get(index).ok_or(RuntimeError::InvalidChoice {
            index,
            count: self.choices.len(),
        })?;
        if !choice.enabled {
            return Err(RuntimeError::DisabledChoice { index });
        }
        let next = choice.next;
        debug!(index, next, "choice selected");
        let choices = std::mem::take(&mut self.choices);
        self.choice_pool.give(choices);
        self.state = RuntimeState::Running;
        self.jump(next);
        Ok(())
    }

    /// Delivers the result of the awaited host call. Call
    /// [`Runtime::advance`] afterwards to resume.
    pub fn complete_async_call(
        &mut self,
        result: Result<Variant, HostError>,
    ) -> Result<(), RuntimeError> {
        let (at, function) = match (self.state, self.pending_call.take()) {
            (RuntimeState::AwaitingAsyncCall, Some(pending)) => pending,
            (state, _) => {
                return Err(RuntimeError::InvalidState {
                    operation: "complete an async call",
                    state,
                })
            }
        };
        match result {
            Ok(value) => {
                debug!(function = function.as_str(), "async call completed");
                self.memo.insert(at, value);
                self.state = RuntimeState::Running;
                Ok(())
            }
            Err(source) => {
                let fault = host_fault(&function, source);
                error!(pointer = self.pointer, "dialog fault: {}", fault);
                self.state = RuntimeState::Ended;
                self.memo.clear();
                Err(fault)
            }
        }
    }

    /// Hands event buffers back for reuse.
    pub fn recycle(&mut self, mut events: Vec<DialogEvent>) {
        for event in events.drain(..) {
            if let DialogEvent::ChoicePresented { choices } = event {
                self.choice_pool.give(choices);
            }
        }
        self.event_pool.give(events);
    }

    fn section(&self, name: &str) -> Result<usize, RuntimeError> {
        self.sections
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownSection {
                name: name.to_string(),
            })
    }

    fn jump(&mut self, target: usize) {
        self.pointer = target;
        self.memo.clear();
    }

    fn end(&mut self, events: &mut Vec<DialogEvent>) -> Flow {
        debug!(pointer = self.pointer, "script ended");
        self.state = RuntimeState::Ended;
        self.memo.clear();
        events.push(DialogEvent::ScriptEnded);
        Flow::Suspend
    }

    fn step<H: HostBinding + ?Sized>(
        &mut self,
        host: &mut H,
        events: &mut Vec<DialogEvent>,
    ) -> Result<Flow, Interrupt> {
        if self.ending {
            self.ending = false;
            return Ok(self.end(events));
        }
        #[cfg(feature = "debug")]
        self.script.disassemble_statement_at(self.pointer)?;

        let (statement, _) = decode_statement(self.script, self.pointer)?;
        Ok(match statement {
            Statement::Section { next, .. } => {
                self.jump(next);
                Flow::Continue
            }
            Statement::End => self.end(events),
            Statement::Line(line) => self.run_line(&line, host, events)?,
            Statement::Instruction { next, expr } => {
                self.eval(expr, host)?;
                self.jump(next);
                Flow::Continue
            }
            Statement::Conditional {
                else_next,
                branches,
            } => {
                let mut target = else_next;
                for (condition, next) in branches {
                    if self.eval_bool(condition, host)? {
                        target = next;
                        break;
                    }
                }
                self.jump(target);
                Flow::Continue
            }
            Statement::Choice { next, items } => self.run_choice(next, &items, host, events)?,
            Statement::Hash { next, pairs } => {
                let data = self.eval_pairs(&pairs, host)?;
                events.push(DialogEvent::HashData {
                    speaker: None,
                    data,
                });
                self.jump(next);
                Flow::Continue
            }
            Statement::Speaker {
                next,
                speaker,
                pairs,
            } => {
                let data = self.eval_pairs(&pairs, host)?;
                events.push(DialogEvent::HashData {
                    speaker: Some(self.script.speaker_id(speaker)?.to_string()),
                    data,
                });
                self.jump(next);
                Flow::Continue
            }
        })
    }

    fn run_line<H: HostBinding + ?Sized>(
        &mut self,
        line: &LineCode,
        host: &mut H,
        events: &mut Vec<DialogEvent>,
    ) -> Result<Flow, Interrupt> {
        let script = self.script;
        let raw = self.render_segments(&line.segments, host)?;

        let mut next = line.next;
        let mut directive_events = Vec::new();
        for directive in line.directives.iter() {
            match decode_expr(script, *directive)?.0 {
                ExprNode::Auto => directive_events.push(DialogEvent::AutoAdvance),
                ExprNode::Speed(value) => {
                    directive_events.push(DialogEvent::SpeedChanged(self.eval_float(value, host)?))
                }
                ExprNode::Pause(value) => {
                    directive_events.push(DialogEvent::PauseRequested(self.eval_float(value, host)?))
                }
                ExprNode::Goto(target) => next = target,
                _ => {
                    self.eval(*directive, host)?;
                }
            }
        }

        // Speakers last: nothing after this point can suspend, so the host's
        // name lookups run once.
        let mut speakers = Vec::with_capacity(line.speakers.len());
        for slot in line.speakers.iter() {
            speakers.push(match slot {
                SpeakerSlot::Id(idx) => script.speaker_id(*idx)?.to_string(),
                SpeakerSlot::Variable(idx) => {
                    let name = script.string(*idx)?;
                    let value = host.try_get_variable(name).ok_or_else(|| {
                        RuntimeError::UnknownVariable {
                            name: name.to_string(),
                        }
                    })?;
                    host.get_name(&value)
                        .map_err(|source| host_fault("get_name", source))?
                }
            });
        }

        let text = interpolate(&raw);
        for tag in text.tags() {
            match tag {
                TextTag::Goto(section) => next = self.section(section)?,
                TextTag::End => self.ending = true,
                _ => {}
            }
        }

        debug!(pointer = self.pointer, next, "line started");
        events.push(DialogEvent::LineStarted {
            speakers,
            text: text.text,
            timeline: text.events,
        });
        events.extend(directive_events);
        self.jump(next);
        Ok(Flow::Suspend)
    }

    fn run_choice<H: HostBinding + ?Sized>(
        &mut self,
        next: usize,
        items: &[ChoiceItemCode],
        host: &mut H,
        events: &mut Vec<DialogEvent>,
    ) -> Result<Flow, Interrupt> {
        let mut choices = self.choice_pool.take();
        let mut filters: Vec<Filter> = Vec::new();
        for item in items {
            let active = filters.last().map_or(true, |filter| filter.active);
            match item {
                ChoiceItemCode::If(condition) => {
                    let hit = active && self.eval_bool(*condition, host)?;
                    filters.push(Filter {
                        enclosing: active,
                        taken: hit,
                        active: hit,
                    });
                }
                ChoiceItemCode::ElseIf(condition) => {
                    if let Some(filter) = filters.last_mut() {
                        let hit =
                            filter.enclosing && !filter.taken && self.eval_bool(*condition, host)?;
                        filter.active = hit;
                        filter.taken |= hit;
                    }
                }
                ChoiceItemCode::Else => {
                    if let Some(filter) = filters.last_mut() {
                        filter.active = filter.enclosing && !filter.taken;
                        filter.taken = true;
                    }
                }
                ChoiceItemCode::EndIf => {
                    filters.pop();
                }
                ChoiceItemCode::Option {
                    next: target,
                    guard,
                    segments,
                } => {
                    if !active {
                        continue;
                    }
                    let enabled = match guard {
                        Some(guard) => self.eval_bool(*guard, host)?,
                        None => true,
                    };
                    let text = interpolate(&self.render_segments(segments, host)?).text;
                    choices.push(Choice {
                        next: *target,
                        text,
                        enabled,
                    });
                }
            }
        }

        if !choices.iter().any(|choice| choice.enabled) {
            warn!(
                pointer = self.pointer,
                "choice block has no enabled option, skipping it"
            );
            self.choice_pool.give(choices);
            self.jump(next);
            return Ok(Flow::Continue);
        }

        debug!(pointer = self.pointer, count = choices.len(), "awaiting choice");
        let mut presented = self.choice_pool.take();
        presented.extend(choices.iter().cloned());
        let previous = std::mem::replace(&mut self.choices, choices);
        self.choice_pool.give(previous);
        events.push(DialogEvent::ChoicePresented { choices: presented });
        self.state = RuntimeState::AwaitingChoice;
        Ok(Flow::Suspend)
    }

    fn render_segments<H: HostBinding + ?Sized>(
        &mut self,
        segments: &[Segment],
        host: &mut H,
    ) -> Result<String, Interrupt> {
        let script = self.script;
        let mut text = String::new();
        for segment in segments {
            match segment {
                Segment::Text(idx) => text.push_str(script.string(*idx)?),
                Segment::Expr(expr) => text.push_str(&self.eval(*expr, host)?.to_string()),
            }
        }
        Ok(text)
    }

    fn eval_pairs<H: HostBinding + ?Sized>(
        &mut self,
        pairs: &[HashPair],
        host: &mut H,
    ) -> Result<BTreeMap<String, Variant>, Interrupt> {
        let script = self.script;
        let mut data = BTreeMap::new();
        for pair in pairs {
            let mut value = Variant::Void;
            for expr in pair.values.iter() {
                value = self.eval(*expr, host)?;
            }
            data.insert(script.string(pair.key)?.to_string(), value);
        }
        Ok(data)
    }

    fn eval_bool<H: HostBinding + ?Sized>(
        &mut self,
        at: usize,
        host: &mut H,
    ) -> Result<bool, Interrupt> {
        let value = self.eval(at, host)?;
        Ok(value
            .as_bool()
            .map_err(|source| RuntimeError::TypeMismatch { at, source })?)
    }

    fn eval_float<H: HostBinding + ?Sized>(
        &mut self,
        at: usize,
        host: &mut H,
    ) -> Result<f64, Interrupt> {
        let value = self.eval(at, host)?;
        Ok(value
            .as_float()
            .map_err(|source| RuntimeError::TypeMismatch { at, source })?)
    }

    fn eval<H: HostBinding + ?Sized>(
        &mut self,
        at: usize,
        host: &mut H,
    ) -> Result<Variant, Interrupt> {
        let script = self.script;
        let (node, _) = decode_expr(script, at)?;
        Ok(match node {
            ExprNode::Float(idx) => Variant::Float(script.float(idx)?),
            ExprNode::String(idx) => Variant::string(script.string(idx)?),
            ExprNode::Bool(value) => Variant::Bool(value),
            ExprNode::Var(idx) => {
                let name = script.string(idx)?;
                host.try_get_variable(name)
                    .ok_or_else(|| RuntimeError::UnknownVariable {
                        name: name.to_string(),
                    })?
            }
            ExprNode::Func {
                name,
                is_await,
                args,
            } => return self.call(at, script.string(name)?, is_await, &args, host),
            ExprNode::Unary(ExprCode::Negate, operand) => {
                Variant::Float(-self.eval_float(operand, host)?)
            }
            ExprNode::Unary(_, operand) => Variant::Bool(!self.eval_bool(operand, host)?),
            ExprNode::Binary(ExprCode::And, left, right) => {
                Variant::Bool(self.eval_bool(left, host)? && self.eval_bool(right, host)?)
            }
            ExprNode::Binary(ExprCode::Or, left, right) => {
                Variant::Bool(self.eval_bool(left, host)? || self.eval_bool(right, host)?)
            }
            ExprNode::Binary(code @ (ExprCode::Equal | ExprCode::NotEqual), left, right) => {
                let left = self.eval(left, host)?;
                let right = self.eval(right, host)?;
                Variant::Bool((left == right) == (code == ExprCode::Equal))
            }
            ExprNode::Binary(code, left, right) => {
                let left = self.eval_float(left, host)?;
                let right = self.eval_float(right, host)?;
                match code {
                    ExprCode::Add => Variant::Float(left + right),
                    ExprCode::Sub => Variant::Float(left - right),
                    ExprCode::Mul => Variant::Float(left * right),
                    ExprCode::Div => Variant::Float(left / right),
                    ExprCode::Mod => Variant::Float(left % right),
                    ExprCode::Less => Variant::Bool(left < right),
                    ExprCode::LessEqual => Variant::Bool(left <= right),
                    ExprCode::Greater => Variant::Bool(left > right),
                    ExprCode::GreaterEqual => Variant::Bool(left >= right),
                    other => {
                        return Err(CodeReadError::InvalidExprCode(at, other.into()).into())
                    }
                }
            }
            ExprNode::Assign(code, name, value) => {
                if self.memo.contains_key(&at) {
                    return Ok(Variant::Void);
                }
                let name = script.string(name)?;
                let value = match code {
                    ExprCode::Assign => self.eval(value, host)?,
                    code => {
                        let current = host
                            .try_get_variable(name)
                            .ok_or_else(|| RuntimeError::UnknownVariable {
                                name: name.to_string(),
                            })?
                            .as_float()
                            .map_err(|source| RuntimeError::TypeMismatch { at, source })?;
                        let operand = self.eval_float(value, host)?;
                        Variant::Float(match code {
                            ExprCode::AddAssign => current + operand,
                            ExprCode::SubAssign => current - operand,
                            ExprCode::MulAssign => current * operand,
                            _ => current / operand,
                        })
                    }
                };
                host.set_variable(name, value)
                    .map_err(|source| host_fault(name, source))?;
                self.memo.insert(at, Variant::Void);
                Variant::Void
            }
            // Directives act through the line that carries them.
            ExprNode::Auto | ExprNode::Goto(_) | ExprNode::Speed(_) | ExprNode::Pause(_) => {
                Variant::Void
            }
        })
    }

    fn call<H: HostBinding + ?Sized>(
        &mut self,
        at: usize,
        name: &str,
        is_await: bool,
        args: &[usize],
        host: &mut H,
    ) -> Result<Variant, Interrupt> {
        if let Some(value) = self.memo.get(&at) {
            return Ok(value.clone());
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(*arg, host)?);
        }
        let value = if is_await {
            match host
                .call_async_method(name, &values)
                .map_err(|source| host_fault(name, source))?
            {
                AsyncCall::Ready(value) => value,
                AsyncCall::Pending => {
                    debug!(function = name, at, "awaiting host call");
                    self.pending_call = Some((at, name.to_string()));
                    self.state = RuntimeState::AwaitingAsyncCall;
                    return Err(Interrupt::Pending);
                }
            }
        } else {
            host.call_method(name, &values)
                .map_err(|source| host_fault(name, source))?
        };
        self.memo.insert(at, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{
        registry::{FuncDef, MemberRegistry, ParamDef},
        text::TextEvent,
        value::ValueType,
        Compiler, CompilerOpts,
    };
    use pretty_assertions::assert_eq;

    type Calls = Rc<RefCell<Vec<String>>>;

    fn string_param() -> Vec<ParamDef> {
        vec![ParamDef {
            value_type: ValueType::String,
            default: None,
        }]
    }

    /// A host whose `check(s)` is true only for "b" and whose `fetch(s)` is
    /// awaited; both record their argument in `calls`.
    fn host(calls: &Calls) -> MemoryHost {
        let check_calls = calls.clone();
        let fetch_calls = calls.clone();
        MemoryHost::new()
            .with_variable("gold", 5.0)
            .with_variable("hero", "bo")
            .with_speaker_name("bo", "Bo")
            .with_function(
                FuncDef {
                    name: "check".into(),
                    return_type: ValueType::Bool,
                    params: string_param(),
                    awaitable: false,
                },
                move |args| {
                    let arg = args[0].to_string();
                    check_calls.borrow_mut().push(format!("check {}", arg));
                    Ok(Variant::Bool(arg == "b"))
                },
            )
            .with_async_function(
                FuncDef {
                    name: "fetch".into(),
                    return_type: ValueType::Float,
                    params: string_param(),
                    awaitable: true,
                },
                move |args| {
                    fetch_calls.borrow_mut().push(format!("fetch {}", args[0]));
                    Ok(AsyncCall::Pending)
                },
            )
            .with_function(
                FuncDef {
                    name: "explode".into(),
                    return_type: ValueType::Void,
                    params: vec![],
                    awaitable: false,
                },
                |_| Err(HostError::Failed("boom".into())),
            )
    }

    fn compile(source: &str, registry: &MemberRegistry) -> ScriptData {
        let compilation =
            Compiler::compile_source("test", source, registry, &CompilerOpts::default());
        assert!(!compilation.has_errors(), "{:?}", compilation.records());
        compilation.script
    }

    /// Advances while the runtime is running, rendering every event.
    fn drive(runtime: &mut Runtime, host: &mut MemoryHost) -> Vec<String> {
        let mut rendered = Vec::new();
        while runtime.state() == RuntimeState::Running {
            let events = runtime.advance(host).unwrap();
            rendered.extend(events.iter().map(ToString::to_string));
            runtime.recycle(events);
        }
        rendered
    }

    #[test]
    fn line_then_goto_end() {
        let calls = Calls::default();
        let mut host = host(&calls);
        let script = compile(
            "=== start\nA: Hello [pause=1] world!\ngoto end\n=== end\nend\n",
            host.registry(),
        );
        let mut runtime = Runtime::new(&script).unwrap();
        runtime.start_script("start").unwrap();

        assert_eq!(
            runtime.advance(&mut host).unwrap(),
            vec![DialogEvent::LineStarted {
                speakers: vec!["A".into()],
                text: "Hello  world!".into(),
                timeline: vec![TextEvent {
                    tag: TextTag::Pause(Some(1.0)),
                    offset: 6,
                    is_await: false,
                }],
            }]
        );
        assert_eq!(runtime.state(), RuntimeState::Running);
        assert_eq!(
            runtime.advance(&mut host).unwrap(),
            vec![DialogEvent::ScriptEnded]
        );
        assert_eq!(runtime.state(), RuntimeState::Ended);
        assert_eq!(
            runtime.advance(&mut host),
            Err(RuntimeError::InvalidState {
                operation: "advance",
                state: RuntimeState::Ended,
            })
        );
    }

    #[test]
    fn playthroughs_are_repeatable() {
        let source = "=== start
#{scene: \"tavern\"}
~ gold += 2
if gold > 6 {
  A: Rich with {gold} gold.
} else {
  A: Poor.
}
{hero}: Fast. <<speed 2, pause 0.5, auto>>
speaker A #{color: \"red\"}
";
        let play = || {
            let calls = Calls::default();
            let mut host = host(&calls);
            let script = compile(source, host.registry());
            let mut runtime = Runtime::new(&script).unwrap();
            runtime.start_script("start").unwrap();
            drive(&mut runtime, &mut host)
        };
        let first = play();
        assert_eq!(
            first,
            vec![
                "hash #{scene: \"tavern\"}",
                "A: Rich with 7 gold.",
                "Bo: Fast.",
                "speed 2",
                "pause 0.5",
                "auto",
                "hash A #{color: \"red\"}",
                "end",
            ]
        );
        assert_eq!(play(), first);
    }

    #[test]
    fn conditionals_stop_at_the_first_true_branch() {
        let source = "=== start
if check(\"a\") {
  A: a
} else if check(\"b\") {
  A: b
} else if check(\"c\") {
  A: c
}
if check(\"x\") {
  A: x
} else {
  A: none
}
";
        let calls = Calls::default();
        let mut host = host(&calls);
        let script = compile(source, host.registry());
        let mut runtime = Runtime::new(&script).unwrap();
        runtime.start_script("start").unwrap();
        assert_eq!(
            drive(&mut runtime, &mut host),
            vec!["A: b", "A: none", "end"]
        );
        assert_eq!(
            *calls.borrow(),
            vec!["check a", "check b", "check x"]
        );
    }

    #[test]
    fn unknown_sections_leave_the_pointer_alone() {
        let calls = Calls::default();
        let mut host = host(&calls);
        let script = compile("=== start\nA: One.\nA: Two.\n", host.registry());
        let mut runtime = Runtime::new(&script).unwrap();
        assert_eq!(
            runtime.start_script("nowhere"),
            Err(RuntimeError::UnknownSection {
                name: "nowhere".into()
            })
        );
        assert_eq!(runtime.state(), RuntimeState::Idle);

        runtime.start_script("start").unwrap();
        runtime.advance(&mut host).unwrap();
        let pointer = runtime.pointer();
        assert!(runtime.start_script("nowhere").is_err());
        assert_eq!(runtime.pointer(), pointer);
        assert_eq!(runtime.state(), RuntimeState::Running);
        assert_eq!(drive(&mut runtime, &mut host), vec!["A: Two.", "end"]);
    }

    #[test]
    fn choice_filters_pick_one_branch() {
        let source = "=== start
choice {
  if false {
    * Hidden
  } else {
    * Shown
  }
  *[gold > 100] Rich
  * Leave -> bye
}
A: After.
=== bye
B: Bye.
";
        let calls = Calls::default();
        let mut host = host(&calls);
        let script = compile(source, host.registry());
        let mut runtime = Runtime::new(&script).unwrap();
        runtime.start_script("start").unwrap();
        let events = runtime.advance(&mut host).unwrap();
        assert_eq!(
            events.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["choice: 0) Shown | 1) (Rich) | 2) Leave"]
        );
        assert_eq!(runtime.state(), RuntimeState::AwaitingChoice);
        assert_eq!(
            runtime.select_choice(1),
            Err(RuntimeError::DisabledChoice { index: 1 })
        );
        assert_eq!(
            runtime.select_choice(7),
            Err(RuntimeError::InvalidChoice { index: 7, count: 3 })
        );
        assert!(runtime.advance(&mut host).is_err());

        runtime.select_choice(2).unwrap();
        assert_eq!(drive(&mut runtime, &mut host), vec!["B: Bye.", "end"]);

        runtime.start_script("start").unwrap();
        drive(&mut runtime, &mut host);
        runtime.select_choice(0).unwrap();
        assert_eq!(drive(&mut runtime, &mut host), vec!["A: After.", "end"]);
    }

    #[test]
    fn choices_without_enabled_options_are_skipped() {
        let calls = Calls::default();
        let mut host = host(&calls);
        let script = compile(
            "=== start\nchoice {\n  *[gold > 100] Rich\n}\nA: Skipped.\n",
            host.registry(),
        );
        let mut runtime = Runtime::new(&script).unwrap();
        runtime.start_script("start").unwrap();
        assert_eq!(
            drive(&mut runtime, &mut host),
            vec!["A: Skipped.", "end"]
        );
    }

    #[test]
    fn awaited_calls_resume_exactly_once() {
        let source = "=== start
#{step: 1}
~ gold = await fetch(\"coins\") + 1
A: Got {gold}.
";
        let calls = Calls::default();
        let mut host = host(&calls);
        let script = compile(source, host.registry());
        let mut runtime = Runtime::new(&script).unwrap();
        runtime.start_script("start").unwrap();

        let events = runtime.advance(&mut host).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to_string(), "hash #{step: 1}");
        assert_eq!(runtime.state(), RuntimeState::AwaitingAsyncCall);
        assert_eq!(runtime.pending_function(), Some("fetch"));
        assert!(runtime.advance(&mut host).is_err());

        runtime.complete_async_call(Ok(Variant::Float(41.0))).unwrap();
        assert_eq!(
            runtime.complete_async_call(Ok(Variant::Float(0.0))),
            Err(RuntimeError::InvalidState {
                operation: "complete an async call",
                state: RuntimeState::Running,
            })
        );
        assert_eq!(drive(&mut runtime, &mut host), vec!["A: Got 42.", "end"]);
        assert_eq!(host.variable("gold"), Some(&Variant::Float(42.0)));
        assert_eq!(*calls.borrow(), vec!["fetch coins"]);
    }

    #[test]
    fn failed_async_calls_end_the_playthrough() {
        let calls = Calls::default();
        let mut host = host(&calls);
        let script = compile("=== start\n~ await fetch(\"x\")\n", host.registry());
        let mut runtime = Runtime::new(&script).unwrap();
        runtime.start_script("start").unwrap();
        runtime.advance(&mut host).unwrap();
        assert_eq!(
            runtime.complete_async_call(Err(HostError::Failed("offline".into()))),
            Err(RuntimeError::Host {
                function: "fetch".into(),
                source: HostError::Failed("offline".into()),
            })
        );
        assert_eq!(runtime.state(), RuntimeState::Ended);
    }

    #[test]
    fn faults_end_the_playthrough() {
        let calls = Calls::default();
        let mut host = host(&calls);
        let script = compile("=== start\n~ explode()\nA: Never.\n", host.registry());
        let mut runtime = Runtime::new(&script).unwrap();
        runtime.start_script("start").unwrap();
        assert_eq!(
            runtime.advance(&mut host),
            Err(RuntimeError::Host {
                function: "explode".into(),
                source: HostError::Failed("boom".into()),
            })
        );
        assert_eq!(runtime.state(), RuntimeState::Ended);

        // Compiled against a registry the host no longer matches.
        let registry = MemberRegistry::new().with_variable("silver", ValueType::Float);
        let script = compile("=== start\nA: {silver}\n", &registry);
        let mut runtime = Runtime::new(&script).unwrap();
        runtime.start_script("start").unwrap();
        assert_eq!(
            runtime.advance(&mut host),
            Err(RuntimeError::UnknownVariable {
                name: "silver".into()
            })
        );
        assert_eq!(runtime.state(), RuntimeState::Ended);
    }

    #[test]
    fn inline_tags_steer_the_script() {
        let source = "=== start
A: Off we go[goto=shop]
A: Skipped.
=== shop
A: Welcome.[end]
A: Never.
";
        let calls = Calls::default();
        let mut host = host(&calls);
        let script = compile(source, host.registry());
        let mut runtime = Runtime::new(&script).unwrap();
        runtime.start_script("start").unwrap();
        assert_eq!(
            drive(&mut runtime, &mut host),
            vec!["A: Off we go [goto=shop@9]", "A: Welcome. [end@8]", "end"]
        );
    }
}
