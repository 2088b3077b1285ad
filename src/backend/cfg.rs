//! Control-flow analysis over recorded functions.

use std::collections::{HashMap, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;

use crate::ast::Type;
use crate::errors::CodegenError;

use super::recording::{Op, RecordingBackend, ValueKind};
use super::{BlockId, Constant, FuncId, Result, ValueId};

/// Block graph of one function; edges follow terminators (both edges of
/// an invoke included).
pub struct ControlFlow {
    graph: DiGraph<BlockId, ()>,
    nodes: HashMap<BlockId, NodeIndex>,
    entry: Option<NodeIndex>,
}

impl ControlFlow {
    pub fn of(backend: &RecordingBackend, func: FuncId) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        let blocks = &backend.function(func).blocks;
        for block in blocks {
            nodes.insert(*block, graph.add_node(*block));
        }
        for block in blocks {
            let Some(term) = backend.block(*block).terminator() else {
                continue;
            };
            for succ in term.successors() {
                if let (Some(from), Some(to)) = (nodes.get(block), nodes.get(&succ)) {
                    graph.add_edge(*from, *to, ());
                }
            }
        }
        let entry = blocks.first().and_then(|block| nodes.get(block).copied());
        Self {
            graph,
            nodes,
            entry,
        }
    }

    pub fn reachable(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        if let Some(entry) = self.entry {
            let mut dfs = Dfs::new(&self.graph, entry);
            while let Some(node) = dfs.next(&self.graph) {
                out.push(self.graph[node]);
            }
        }
        out.sort();
        out
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable().contains(&block)
    }

    pub fn unreachable_blocks(&self) -> Vec<BlockId> {
        let reachable = self.reachable();
        let mut out: Vec<BlockId> = self
            .nodes
            .keys()
            .filter(|block| !reachable.contains(block))
            .copied()
            .collect();
        out.sort();
        out
    }

    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        let Some(node) = self.nodes.get(&block) else {
            return Vec::new();
        };
        let mut preds: Vec<BlockId> = self
            .graph
            .neighbors_directed(*node, Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        preds.sort();
        preds.dedup();
        preds
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEnd {
    Return,
    Unreachable,
    StepLimit,
}

/// One concrete execution path through a function.
#[derive(Debug, Clone)]
pub struct Trace {
    pub blocks: Vec<BlockId>,
    pub calls: Vec<String>,
    /// Candidate type of every executed tag test with its outcome.
    pub guards: Vec<(Type, bool)>,
    pub end: TraceEnd,
}

#[derive(Debug, Clone)]
enum RuntimeValue {
    Bool(bool),
    Tag(Type),
}

const STEP_LIMIT: usize = 10_000;

/// Follows one path through a recorded function, assuming the given
/// concrete types for successive `type_id` evaluations. A `type_id`
/// without an assumed type yields its static type.
pub struct PathWalker<'a> {
    backend: &'a RecordingBackend,
    runtime_types: VecDeque<Type>,
}

impl<'a> PathWalker<'a> {
    pub fn new(backend: &'a RecordingBackend) -> Self {
        Self {
            backend,
            runtime_types: VecDeque::new(),
        }
    }

    pub fn assume(mut self, types: impl IntoIterator<Item = Type>) -> Self {
        self.runtime_types.extend(types);
        self
    }

    pub fn run(mut self, func: FuncId) -> Result<Trace> {
        let backend = self.backend;
        let mut env: HashMap<ValueId, RuntimeValue> = HashMap::new();
        let mut trace = Trace {
            blocks: Vec::new(),
            calls: Vec::new(),
            guards: Vec::new(),
            end: TraceEnd::StepLimit,
        };
        let mut current = *backend
            .function(func)
            .blocks
            .first()
            .ok_or_else(|| CodegenError::backend("function has no body"))?;

        for _ in 0..STEP_LIMIT {
            trace.blocks.push(current);
            let mut next = None;
            for inst in &backend.block(current).insts {
                match &inst.op {
                    Op::TypeId { ty, .. } => {
                        let concrete = self.runtime_types.pop_front().unwrap_or_else(|| ty.clone());
                        if let Some(result) = inst.result {
                            env.insert(result, RuntimeValue::Tag(concrete));
                        }
                    }
                    Op::MatchTypeTag { candidate, tag, .. } => {
                        let Some(RuntimeValue::Tag(concrete)) = env.get(tag) else {
                            return Err(CodegenError::backend("type tag test on a non-tag value"));
                        };
                        let matched = backend.types().is_subtype(concrete, candidate);
                        trace.guards.push((candidate.clone(), matched));
                        if let Some(result) = inst.result {
                            env.insert(result, RuntimeValue::Bool(matched));
                        }
                    }
                    Op::And { lhs, rhs } => {
                        let value = self.truth(&env, *lhs)? && self.truth(&env, *rhs)?;
                        if let Some(result) = inst.result {
                            env.insert(result, RuntimeValue::Bool(value));
                        }
                    }
                    Op::Call { func, .. } => {
                        trace.calls.push(backend.func_name(*func).to_string());
                    }
                    Op::Invoke { func, normal, .. } => {
                        trace.calls.push(backend.func_name(*func).to_string());
                        next = Some(*normal);
                    }
                    Op::Br(target) => next = Some(*target),
                    Op::CondBr {
                        cond,
                        then,
                        otherwise,
                    } => {
                        next = Some(if self.truth(&env, *cond)? {
                            *then
                        } else {
                            *otherwise
                        });
                    }
                    Op::Unreachable => {
                        trace.end = TraceEnd::Unreachable;
                        return Ok(trace);
                    }
                    Op::Ret(_) => {
                        trace.end = TraceEnd::Return;
                        return Ok(trace);
                    }
                    _ => {}
                }
            }
            current = next.ok_or_else(|| {
                CodegenError::backend(format!(
                    "block {} falls off without a terminator",
                    backend.block_label(current)
                ))
            })?;
        }
        Ok(trace)
    }

    fn truth(&self, env: &HashMap<ValueId, RuntimeValue>, value: ValueId) -> Result<bool> {
        if let ValueKind::Const(Constant::Int { value, .. }) = self.backend.value(value) {
            return Ok(*value != 0);
        }
        match env.get(&value) {
            Some(RuntimeValue::Bool(b)) => Ok(*b),
            _ => Err(CodegenError::backend(format!(
                "cannot evaluate condition %{}",
                value.0
            ))),
        }
    }
}
