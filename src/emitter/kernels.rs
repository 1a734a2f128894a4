//! Per-node kernel source generation.
//!
//! One function per executable node. Kernels read operand buffers, write
//! the node's output buffer and return; the shapes below mirror the
//! structure of the reference executor: a flat loop over the output
//! index, a decoded index tuple per factor, and one nested loop per
//! contracted or pooled dimension. Kronecker-delta operands are fused
//! into contraction and product kernels as index-equality tests scaled
//! by the delta's scaling factor; they are never materialized as dense
//! buffers.

use super::writer::SourceWriter;
use super::EmitCtx;
use crate::error::{Error, Result};
use crate::node::{KindParams, Node, NodeKind, Payload};
use crate::node_id::NodeId;
use crate::ring::Ring;
use crate::space::VectorSpace;

/// A resolved operand or result buffer as seen from a kernel body.
struct Buf {
    /// Local binding name inside the kernel (`lhs`, `out`, …).
    name: String,
    ident: String,
    ring: Ring,
    writable: bool,
}

fn format_f32(v: f32) -> String {
    format!("{v:?}f32")
}

/// Index-tuple decode, mirroring the stride arithmetic of the reference
/// kernels: `t[0] = i / s0`, `t[k] = (i % s[k-1]) / s[k]`.
fn tuple_exprs(index: &str, strides: &[usize]) -> Vec<String> {
    let mut exprs = Vec::with_capacity(strides.len());
    for (k, &s) in strides.iter().enumerate() {
        let base = if k == 0 {
            index.to_string()
        } else {
            format!("({index} % {})", strides[k - 1])
        };
        if s == 1 {
            exprs.push(base);
        } else {
            exprs.push(format!("{base} / {s}"));
        }
    }
    exprs
}

/// Linear address from per-factor expressions and strides.
fn linear_expr(tuple: &[String], strides: &[usize]) -> String {
    let terms: Vec<String> = tuple
        .iter()
        .zip(strides)
        .map(|(t, &s)| if s == 1 { t.clone() } else { format!("{t} * {s}") })
        .collect();
    if terms.is_empty() {
        "0".to_string()
    } else {
        terms.join(" + ")
    }
}

fn usize_strides(space: &VectorSpace) -> Vec<usize> {
    space.strides().iter().map(|&s| s as usize).collect()
}

/// Element read with an optional ring cast.
fn read_elem(buf: &Buf, index: &str, target: Ring) -> String {
    let expr = format!("{}[{index}]", buf.name);
    if buf.ring == target {
        expr
    } else {
        format!("({expr} as {})", target.type_name())
    }
}

impl EmitCtx {
    fn buf_for(&self, id: NodeId, name: &str) -> Result<Buf> {
        let owner = self.storage_owner(id)?;
        let var = self.vars.get(&owner).ok_or_else(|| Error::EmitterIo {
            detail: format!("node {id} has no materialized buffer"),
        })?;
        Ok(Buf {
            name: name.to_string(),
            ident: var.ident.clone(),
            ring: var.ring,
            writable: var.writable,
        })
    }

    fn kron_of(&self, id: NodeId) -> Option<(Vec<u32>, f32)> {
        let node = self.nodes.get(&id)?;
        match (&node.kind, &node.params) {
            (NodeKind::VectorKroneckerDeltaProduct, KindParams::Kronecker { delta_pairs, scaling }) => {
                Some((delta_pairs.clone(), scaling.0))
            }
            _ => None,
        }
    }

    fn space_of(&self, id: NodeId) -> Result<VectorSpace> {
        self.nodes
            .get(&id)
            .and_then(|n| n.payload.space().cloned())
            .ok_or_else(|| Error::EmitterIo { detail: format!("node {id} carries no space") })
    }
}

/// Emit local bindings for the result and operand buffers. Operands that
/// share the result's buffer (storage relations) are read through `out`.
fn bind_buffers(w: &mut SourceWriter, out: Option<&Buf>, operands: &mut [Buf]) {
    if let Some(out) = out {
        w.line(format!("let out = unsafe {{ &mut *{}.get() }};", out.ident));
    }
    for op in operands.iter_mut() {
        if let Some(out) = out {
            if op.ident == out.ident {
                op.name = "out".to_string();
                continue;
            }
        }
        if op.writable {
            w.line(format!("let {} = unsafe {{ &*{}.get() }};", op.name, op.ident));
        } else {
            w.line(format!("let {} = &{};", op.name, op.ident));
        }
    }
}

/// Generate the full kernel function for one executable node.
pub(super) fn kernel_source(ctx: &EmitCtx, id: NodeId) -> Result<String> {
    let node = ctx.nodes.get(&id).expect("executable node");
    let mut w = SourceWriter::new();

    let needs_ctx = matches!(node.kind, NodeKind::ControlTransferWhile);
    let ctx_arg = if needs_ctx { "ctx" } else { "_ctx" };
    w.line(format!("/// {} (graph node {})", node.kind.name(), id.raw()));
    w.open(format!(
        "pub(crate) fn node{}_kernel({ctx_arg}: &PushCtx) {{",
        id.raw()
    ));

    match node.kind {
        NodeKind::VectorAddition => addition(ctx, &mut w, node)?,
        NodeKind::VectorScalarProduct => scalar_product(ctx, &mut w, node)?,
        NodeKind::VectorVectorProduct => vector_product(ctx, &mut w, node)?,
        NodeKind::VectorPower => power(ctx, &mut w, node)?,
        NodeKind::VectorComparisonIsSmaller => is_smaller(ctx, &mut w, node)?,
        NodeKind::VectorContraction => contraction(ctx, &mut w, node)?,
        NodeKind::VectorPermutation => permutation(ctx, &mut w, node)?,
        NodeKind::VectorProjection => projection(ctx, &mut w, node)?,
        NodeKind::VectorJoinIndices => join_indices(ctx, &mut w, node)?,
        NodeKind::VectorIndexSplitSum => index_split_sum(ctx, &mut w, node)?,
        NodeKind::VectorCrossCorrelation => cross_correlation(ctx, &mut w, node)?,
        NodeKind::VectorMaxPool => max_pool(ctx, &mut w, node)?,
        NodeKind::Output => output(ctx, &mut w, node)?,
        NodeKind::Input => input(ctx, &mut w, node)?,
        NodeKind::ControlTransferWhile => control_transfer_while(ctx, &mut w, node)?,
        NodeKind::Vector | NodeKind::VectorKroneckerDeltaProduct => {
            return Err(Error::EmitterIo {
                detail: format!("node {id} of kind {} has no kernel", node.kind.name()),
            });
        }
    }

    w.close("}");
    Ok(w.finish())
}

fn addition(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    for &p in &node.parents {
        if ctx.kron_of(p).is_some() {
            return Err(Error::EmitterIo {
                detail: format!("Kronecker operand of node {} cannot be fused into an addition", node.id),
            });
        }
    }
    let out = ctx.buf_for(node.id, "out")?;
    let mut ops = vec![
        ctx.buf_for(node.parents[0], "lhs")?,
        ctx.buf_for(node.parents[1], "rhs")?,
    ];
    bind_buffers(w, Some(&out), &mut ops);
    let dim = ctx.space_of(node.id)?.total_dim();
    w.open(format!("for dim in 0..{dim} {{"));
    w.line(format!(
        "out[dim] = {} + {};",
        read_elem(&ops[0], "dim", out.ring),
        read_elem(&ops[1], "dim", out.ring)
    ));
    w.close("}");
    Ok(())
}

fn scalar_product(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    // The scalar operand is whichever side has total dimension 1; with
    // two scalars the right one is taken, matching the constructor.
    let p0 = node.parents[0];
    let p1 = node.parents[1];
    let (vec_id, scalar_id) = if ctx.space_of(p1)?.total_dim() == 1 {
        (p0, p1)
    } else {
        (p1, p0)
    };
    if ctx.kron_of(scalar_id).is_some() {
        return Err(Error::EmitterIo {
            detail: format!("node {}: a Kronecker delta cannot be the scalar operand", node.id),
        });
    }

    let out = ctx.buf_for(node.id, "out")?;

    if let Some((pairs, scaling)) = ctx.kron_of(vec_id) {
        // δ times scalar: the dense result is the scaled delta pattern.
        let mut ops = vec![ctx.buf_for(scalar_id, "s")?];
        bind_buffers(w, Some(&out), &mut ops);
        let space = ctx.space_of(node.id)?;
        let strides = usize_strides(&space);
        let len = space.total_dim();
        let zero = if out.ring == Ring::Float32 { "0.0" } else { "0" };
        w.open(format!("for op_index in 0..{len} {{"));
        w.line(format!("let t = [{}];", tuple_exprs("op_index", &strides).join(", ")));
        w.line(format!("let delta = {};", delta_condition(&pairs, "t")));
        w.open("out[op_index] = if delta {");
        w.line(format!(
            "{} * {}",
            format_f32(scaling),
            read_elem(&ops[0], "0", out.ring)
        ));
        w.close(format!("}} else {{ {zero} }};"));
        w.close("}");
        return Ok(());
    }

    let mut ops = vec![ctx.buf_for(vec_id, "vec")?, ctx.buf_for(scalar_id, "s")?];
    bind_buffers(w, Some(&out), &mut ops);
    let dim = ctx.space_of(node.id)?.total_dim();
    w.open(format!("for dim in 0..{dim} {{"));
    w.line(format!(
        "out[dim] = {} * {};",
        read_elem(&ops[0], "dim", out.ring),
        read_elem(&ops[1], "0", out.ring)
    ));
    w.close("}");
    Ok(())
}

/// The conjunction of one equality test per delta pair (`i < pair(i)`
/// positions only; fixed points are trivially true).
fn delta_condition(pairs: &[u32], tuple: &str) -> String {
    let mut tests = Vec::new();
    for (i, &p) in pairs.iter().enumerate() {
        if (i as u32) < p {
            tests.push(format!("{tuple}[{i}] == {tuple}[{p}]"));
        }
    }
    if tests.is_empty() {
        "true".to_string()
    } else {
        tests.join(" && ")
    }
}

fn vector_product(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let p0 = node.parents[0];
    let p1 = node.parents[1];
    let out = ctx.buf_for(node.id, "out")?;
    let out_space = ctx.space_of(node.id)?;

    let kron_side = match (ctx.kron_of(p0), ctx.kron_of(p1)) {
        (Some(_), Some(_)) => {
            return Err(Error::EmitterIo {
                detail: format!("node {}: a product of two Kronecker deltas is not fusable", node.id),
            });
        }
        (Some(k), None) => Some((p0, p1, k, true)),
        (None, Some(k)) => Some((p1, p0, k, false)),
        (None, None) => None,
    };

    if let Some((_kron_id, other_id, (pairs, scaling), kron_left)) = kron_side {
        let other_space = ctx.space_of(other_id)?;
        let mut ops = vec![ctx.buf_for(other_id, "other")?];
        bind_buffers(w, Some(&out), &mut ops);

        let strides = usize_strides(&out_space);
        let kron_rank = out_space.rank() - other_space.rank();
        let (kron_off, other_off) = if kron_left { (0, kron_rank) } else { (other_space.rank(), 0) };

        w.open(format!("for op_index in 0..{} {{", out_space.total_dim()));
        let t = tuple_exprs("op_index", &strides);
        w.line(format!("let t = [{}];", t.join(", ")));
        let other_tuple: Vec<String> = (0..other_space.rank())
            .map(|i| format!("t[{}]", other_off + i))
            .collect();
        // The delta test runs directly on `t` at the delta's offset.
        let shifted: Vec<String> = pairs
            .iter()
            .enumerate()
            .filter(|&(i, &p)| (i as u32) < p)
            .map(|(i, &p)| format!("t[{}] == t[{}]", kron_off + i, kron_off + p as usize))
            .collect();
        let cond = if shifted.is_empty() { "true".to_string() } else { shifted.join(" && ") };
        let other_strides = usize_strides(&other_space);
        let other_elem = {
            let lin = linear_expr(&other_tuple, &other_strides);
            let buf = &ops[0];
            read_elem(buf, &lin, out.ring)
        };
        let zero = if out.ring == Ring::Float32 { "0.0" } else { "0" };
        w.open(format!("out[op_index] = if {cond} {{"));
        w.line(format!("{} * {other_elem}", format_f32(scaling)));
        w.close(format!("}} else {{ {zero} }};"));
        w.close("}");
        return Ok(());
    }

    let mut ops = vec![ctx.buf_for(p0, "lhs")?, ctx.buf_for(p1, "rhs")?];
    bind_buffers(w, Some(&out), &mut ops);
    let l_len = ctx.space_of(p0)?.total_dim();
    let r_len = ctx.space_of(p1)?.total_dim();
    w.open(format!("for i in 0..{l_len} {{"));
    w.open(format!("for j in 0..{r_len} {{"));
    w.line(format!(
        "out[i * {r_len} + j] = {} * {};",
        read_elem(&ops[0], "i", out.ring),
        read_elem(&ops[1], "j", out.ring)
    ));
    w.close("}");
    w.close("}");
    Ok(())
}

fn power(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let out = ctx.buf_for(node.id, "out")?;
    if out.ring != Ring::Float32 {
        return Err(Error::EmitterIo {
            detail: format!("node {}: power kernels are only emitted over Float32", node.id),
        });
    }
    let mut ops = vec![
        ctx.buf_for(node.parents[0], "base")?,
        ctx.buf_for(node.parents[1], "exp")?,
    ];
    bind_buffers(w, Some(&out), &mut ops);
    let dim = ctx.space_of(node.id)?.total_dim();
    w.open(format!("for dim in 0..{dim} {{"));
    w.line(format!(
        "out[dim] = {}.powf({});",
        read_elem(&ops[0], "dim", Ring::Float32),
        read_elem(&ops[1], "0", Ring::Float32)
    ));
    w.close("}");
    Ok(())
}

fn is_smaller(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let out = ctx.buf_for(node.id, "out")?;
    let mut ops = vec![
        ctx.buf_for(node.parents[0], "lhs")?,
        ctx.buf_for(node.parents[1], "rhs")?,
    ];
    bind_buffers(w, Some(&out), &mut ops);

    let l_len = ctx.space_of(node.parents[0])?.total_dim();
    let r_len = ctx.space_of(node.parents[1])?.total_dim();
    for (name, buf, len) in [("l_norm", &ops[0], l_len), ("r_norm", &ops[1], r_len)] {
        let zero = if buf.ring == Ring::Float32 { "0.0f32" } else { "0i32" };
        w.line(format!("let mut {name} = {zero};"));
        w.open(format!("for dim in 0..{len} {{"));
        w.line(format!(
            "{name} += {} * {};",
            read_elem(buf, "dim", buf.ring),
            read_elem(buf, "dim", buf.ring)
        ));
        w.close("}");
    }
    let (l_cmp, r_cmp) = if ops[0].ring == ops[1].ring {
        ("l_norm".to_string(), "r_norm".to_string())
    } else {
        ("(l_norm as f32)".to_string(), "(r_norm as f32)".to_string())
    };
    w.line(format!("out[0] = if {l_cmp} < {r_cmp} {{ 1 }} else {{ 0 }};"));
    Ok(())
}

/// Index expressions for one side of a contraction: contracted positions
/// take the loop variables, residual positions take output-tuple slots
/// starting at `res_offset`.
fn side_tuple(rank: usize, contracted: &[u32], res_offset: usize) -> Vec<String> {
    let mut exprs = Vec::with_capacity(rank);
    let mut residual = 0usize;
    for p in 0..rank {
        if let Some(k) = contracted.iter().position(|&c| c as usize == p) {
            exprs.push(format!("d{k}"));
        } else {
            exprs.push(format!("t[{}]", res_offset + residual));
            residual += 1;
        }
    }
    exprs
}

fn contraction(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let KindParams::Contract { lfactors, rfactors } = &node.params else {
        return Err(Error::EmitterIo {
            detail: format!("node {} misses contraction parameters", node.id),
        });
    };
    let p0 = node.parents[0];
    let p1 = node.parents[1];
    let out = ctx.buf_for(node.id, "out")?;
    let out_space = ctx.space_of(node.id)?;
    let l_space = ctx.space_of(p0)?;
    let r_space = ctx.space_of(p1)?;

    let l_res = l_space.rank() - lfactors.len();
    let r_res = r_space.rank() - rfactors.len();
    let scalar_out = l_res + r_res == 0;

    let contracted_dims: Vec<u32> = lfactors
        .iter()
        .map(|&f| l_space.factors()[f as usize].dim)
        .collect();

    let kron = match (ctx.kron_of(p0), ctx.kron_of(p1)) {
        (Some(_), Some(_)) => {
            return Err(Error::EmitterIo {
                detail: format!(
                    "node {}: a contraction of two Kronecker deltas should have been folded",
                    node.id
                ),
            });
        }
        (Some(k), None) => Some((k, true)),
        (None, Some(k)) => Some((k, false)),
        (None, None) => None,
    };

    let sum_zero = if out.ring == Ring::Float32 { "0.0f32" } else { "0i32" };

    let open_loops = |w: &mut SourceWriter| {
        for (k, &dim) in contracted_dims.iter().enumerate() {
            w.open(format!("for d{k} in 0..{dim} {{"));
        }
    };
    let close_loops = |w: &mut SourceWriter| {
        for _ in &contracted_dims {
            w.close("}");
        }
    };

    if let Some(((pairs, scaling), kron_left)) = kron {
        // One operand is a delta: translate its involution into index
        // equality tests instead of materializing it.
        let (arg_id, arg_space, arg_contr, kron_space, kron_contr, arg_res_off, kron_res_off) =
            if kron_left {
                (p1, &r_space, rfactors, &l_space, lfactors, l_res, 0)
            } else {
                (p0, &l_space, lfactors, &r_space, rfactors, 0, l_res)
            };

        let mut ops = vec![ctx.buf_for(arg_id, "arg")?];
        bind_buffers(w, Some(&out), &mut ops);

        let arg_strides = usize_strides(arg_space);
        w.open(format!("for op_index in 0..{} {{", out_space.total_dim()));
        if !scalar_out {
            let strides = usize_strides(&out_space);
            w.line(format!("let t = [{}];", tuple_exprs("op_index", &strides).join(", ")));
        }
        w.line(format!("let mut sum = {sum_zero};"));
        open_loops(w);
        let arg_tuple = side_tuple(arg_space.rank(), arg_contr, arg_res_off);
        let kron_tuple = side_tuple(kron_space.rank(), kron_contr, kron_res_off);
        w.line(format!("let k = [{}];", kron_tuple.join(", ")));
        let cond = delta_condition(&pairs, "k");
        let arg_elem = read_elem(&ops[0], &linear_expr(&arg_tuple, &arg_strides), out.ring);
        w.open(format!("if {cond} {{"));
        w.line(format!("sum += {arg_elem} * {};", format_f32(scaling)));
        w.close("}");
        close_loops(w);
        w.line("out[op_index] = sum;");
        w.close("}");
        return Ok(());
    }

    let mut ops = vec![ctx.buf_for(p0, "lhs")?, ctx.buf_for(p1, "rhs")?];
    bind_buffers(w, Some(&out), &mut ops);

    let l_strides = usize_strides(&l_space);
    let r_strides = usize_strides(&r_space);

    w.open(format!("for op_index in 0..{} {{", out_space.total_dim()));
    if !scalar_out {
        let strides = usize_strides(&out_space);
        w.line(format!("let t = [{}];", tuple_exprs("op_index", &strides).join(", ")));
    }
    w.line(format!("let mut sum = {sum_zero};"));
    open_loops(w);
    let l_tuple = side_tuple(l_space.rank(), lfactors, 0);
    let r_tuple = side_tuple(r_space.rank(), rfactors, l_res);
    w.line(format!(
        "sum += {} * {};",
        read_elem(&ops[0], &linear_expr(&l_tuple, &l_strides), out.ring),
        read_elem(&ops[1], &linear_expr(&r_tuple, &r_strides), out.ring)
    ));
    close_loops(w);
    w.line("out[op_index] = sum;");
    w.close("}");
    Ok(())
}

fn permutation(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let KindParams::Permute { indices } = &node.params else {
        return Err(Error::EmitterIo {
            detail: format!("node {} misses permutation parameters", node.id),
        });
    };
    let out = ctx.buf_for(node.id, "out")?;
    let mut ops = vec![ctx.buf_for(node.parents[0], "a")?];
    bind_buffers(w, Some(&out), &mut ops);

    let space = ctx.space_of(node.id)?;
    let strides = usize_strides(&space);
    let in_strides = usize_strides(&ctx.space_of(node.parents[0])?);
    let rank = space.rank();

    w.open(format!("for op_index in 0..{} {{", space.total_dim()));
    w.line(format!("let t = [{}];", tuple_exprs("op_index", &strides).join(", ")));
    w.line(format!("let mut s = [0usize; {rank}];"));
    // Position j of the output carries the input's index indices[j].
    for (j, &p) in indices.iter().enumerate() {
        w.line(format!("s[{p}] = t[{j}];"));
    }
    let s_tuple: Vec<String> = (0..rank).map(|i| format!("s[{i}]")).collect();
    w.line(format!(
        "out[op_index] = {};",
        read_elem(&ops[0], &linear_expr(&s_tuple, &in_strides), out.ring)
    ));
    w.close("}");
    Ok(())
}

fn projection(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let KindParams::Project { range } = &node.params else {
        return Err(Error::EmitterIo {
            detail: format!("node {} misses projection parameters", node.id),
        });
    };
    let out = ctx.buf_for(node.id, "out")?;
    let mut ops = vec![ctx.buf_for(node.parents[0], "a")?];
    bind_buffers(w, Some(&out), &mut ops);

    let space = ctx.space_of(node.id)?;
    let strides = usize_strides(&space);
    let in_strides = usize_strides(&ctx.space_of(node.parents[0])?);

    w.open(format!("for op_index in 0..{} {{", space.total_dim()));
    w.line(format!("let t = [{}];", tuple_exprs("op_index", &strides).join(", ")));
    let in_tuple: Vec<String> = range
        .iter()
        .enumerate()
        .map(|(f, &(lo, _))| if lo == 0 { format!("t[{f}]") } else { format!("(t[{f}] + {lo})") })
        .collect();
    w.line(format!(
        "out[op_index] = {};",
        read_elem(&ops[0], &linear_expr(&in_tuple, &in_strides), out.ring)
    ));
    w.close("}");
    Ok(())
}

fn join_indices(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let KindParams::JoinIndices { groups } = &node.params else {
        return Err(Error::EmitterIo {
            detail: format!("node {} misses join parameters", node.id),
        });
    };
    let out = ctx.buf_for(node.id, "out")?;
    let mut ops = vec![ctx.buf_for(node.parents[0], "a")?];
    bind_buffers(w, Some(&out), &mut ops);

    let space = ctx.space_of(node.id)?;
    let in_space = ctx.space_of(node.parents[0])?;
    let strides = usize_strides(&space);
    let in_strides = usize_strides(&in_space);

    // Output position of each surviving input factor: a joined factor is
    // represented by its group's smallest index.
    let mut out_pos = std::collections::BTreeMap::new();
    let mut next = 0usize;
    for f in 0..in_space.rank() as u32 {
        let keep = match groups.iter().find(|g| g.contains(&f)) {
            Some(g) => g[0] == f,
            None => true,
        };
        if keep {
            out_pos.insert(f, next);
            next += 1;
        }
    }
    let slot_of = |f: u32| -> usize {
        let rep = groups
            .iter()
            .find(|g| g.contains(&f))
            .map_or(f, |g| g[0]);
        out_pos[&rep]
    };

    w.open(format!("for op_index in 0..{} {{", space.total_dim()));
    w.line(format!("let t = [{}];", tuple_exprs("op_index", &strides).join(", ")));
    let in_tuple: Vec<String> = (0..in_space.rank() as u32)
        .map(|f| format!("t[{}]", slot_of(f)))
        .collect();
    w.line(format!(
        "out[op_index] = {};",
        read_elem(&ops[0], &linear_expr(&in_tuple, &in_strides), out.ring)
    ));
    w.close("}");
    Ok(())
}

fn index_split_sum(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let KindParams::IndexSplitSum { split_positions } = &node.params else {
        return Err(Error::EmitterIo {
            detail: format!("node {} misses split parameters", node.id),
        });
    };
    let out = ctx.buf_for(node.id, "out")?;
    let mut ops = vec![ctx.buf_for(node.parents[0], "a")?];
    bind_buffers(w, Some(&out), &mut ops);

    let space = ctx.space_of(node.id)?;
    let in_space = ctx.space_of(node.parents[0])?;
    let strides = usize_strides(&space);
    let in_strides = usize_strides(&in_space);
    let sum_zero = if out.ring == Ring::Float32 { "0.0f32" } else { "0i32" };

    w.open(format!("for op_index in 0..{} {{", space.total_dim()));
    w.line(format!("let t = [{}];", tuple_exprs("op_index", &strides).join(", ")));
    w.line(format!("let mut sum = {sum_zero};"));
    let mut windows = Vec::new();
    for (f, &s) in split_positions.iter().enumerate() {
        if s > 0 {
            let count = in_space.factors()[f].dim / s;
            w.open(format!("for w{f} in 0..{count} {{"));
            windows.push(f);
        }
    }
    let in_tuple: Vec<String> = split_positions
        .iter()
        .enumerate()
        .map(|(f, &s)| {
            if s > 0 {
                format!("(w{f} * {s} + t[{f}])")
            } else {
                format!("t[{f}]")
            }
        })
        .collect();
    w.line(format!(
        "sum += {};",
        read_elem(&ops[0], &linear_expr(&in_tuple, &in_strides), out.ring)
    ));
    for _ in &windows {
        w.close("}");
    }
    w.line("out[op_index] = sum;");
    w.close("}");
    Ok(())
}

fn cross_correlation(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let out = ctx.buf_for(node.id, "out")?;
    let mut ops = vec![
        ctx.buf_for(node.parents[0], "a")?,
        ctx.buf_for(node.parents[1], "kernel")?,
    ];
    bind_buffers(w, Some(&out), &mut ops);

    let space = ctx.space_of(node.id)?;
    let in_space = ctx.space_of(node.parents[0])?;
    let k_space = ctx.space_of(node.parents[1])?;
    let strides = usize_strides(&space);
    let in_strides = usize_strides(&in_space);
    let k_strides = usize_strides(&k_space);
    let sum_zero = if out.ring == Ring::Float32 { "0.0f32" } else { "0i32" };

    w.open(format!("for op_index in 0..{} {{", space.total_dim()));
    w.line(format!("let t = [{}];", tuple_exprs("op_index", &strides).join(", ")));
    w.line(format!("let mut sum = {sum_zero};"));
    for (f, factor) in k_space.factors().iter().enumerate() {
        w.open(format!("for k{f} in 0..{} {{", factor.dim));
    }
    let in_tuple: Vec<String> = (0..in_space.rank())
        .map(|f| format!("(t[{f}] + k{f})"))
        .collect();
    let k_tuple: Vec<String> = (0..k_space.rank()).map(|f| format!("k{f}")).collect();
    w.line(format!(
        "sum += {} * {};",
        read_elem(&ops[0], &linear_expr(&in_tuple, &in_strides), out.ring),
        read_elem(&ops[1], &linear_expr(&k_tuple, &k_strides), out.ring)
    ));
    for _ in k_space.factors() {
        w.close("}");
    }
    w.line("out[op_index] = sum;");
    w.close("}");
    Ok(())
}

fn max_pool(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let KindParams::MaxPool { pool_size } = &node.params else {
        return Err(Error::EmitterIo {
            detail: format!("node {} misses pool parameters", node.id),
        });
    };
    let out = ctx.buf_for(node.id, "out")?;
    let mut ops = vec![ctx.buf_for(node.parents[0], "a")?];
    bind_buffers(w, Some(&out), &mut ops);

    let space = ctx.space_of(node.id)?;
    let in_space = ctx.space_of(node.parents[0])?;
    let strides = usize_strides(&space);
    let in_strides = usize_strides(&in_space);
    let start = if out.ring == Ring::Float32 { "f32::NEG_INFINITY" } else { "i32::MIN" };

    w.open(format!("for op_index in 0..{} {{", space.total_dim()));
    w.line(format!("let t = [{}];", tuple_exprs("op_index", &strides).join(", ")));
    w.line(format!("let mut best = {start};"));
    for (f, &p) in pool_size.iter().enumerate() {
        w.open(format!("for w{f} in 0..{p} {{"));
    }
    let in_tuple: Vec<String> = pool_size
        .iter()
        .enumerate()
        .map(|(f, &p)| if p == 1 { format!("t[{f}]") } else { format!("(t[{f}] * {p} + w{f})") })
        .collect();
    w.line(format!(
        "let candidate = {};",
        read_elem(&ops[0], &linear_expr(&in_tuple, &in_strides), out.ring)
    ));
    w.line("if candidate > best { best = candidate; }");
    for _ in pool_size {
        w.close("}");
    }
    w.line("out[op_index] = best;");
    w.close("}");
    Ok(())
}

fn output(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let Payload::Output { name } = &node.payload else {
        return Err(Error::EmitterIo { detail: format!("node {} misses output payload", node.id) });
    };
    let slot = super::shouty_ident(name);
    for (i, &p) in node.parents.iter().enumerate() {
        if ctx.kron_of(p).is_some() {
            return Err(Error::EmitterIo {
                detail: format!("node {}: a Kronecker delta cannot feed an output", node.id),
            });
        }
        let buf = ctx.buf_for(p, &format!("data{i}"))?;
        if buf.writable {
            w.line(format!("let data{i} = unsafe {{ &*{}.get() }};", buf.ident));
            w.line(format!(
                "(crate::interface::{slot}.get().unwrap())(&data{i}[..]);"
            ));
        } else {
            w.line(format!(
                "(crate::interface::{slot}.get().unwrap())(&{}[..]);",
                buf.ident
            ));
        }
    }
    Ok(())
}

fn input(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let Payload::Input { name, .. } = &node.payload else {
        return Err(Error::EmitterIo { detail: format!("node {} misses input payload", node.id) });
    };
    let slot = format!("{}_FILL", super::shouty_ident(name));
    let buf = ctx.buf_for(node.id, "data")?;
    w.open(format!("if let Some(fill) = crate::interface::{slot}.get() {{"));
    w.line(format!("fill(unsafe {{ &mut *{}.get() }});", buf.ident));
    w.close("}");
    Ok(())
}

fn control_transfer_while(ctx: &EmitCtx, w: &mut SourceWriter, node: &Node) -> Result<()> {
    let cond = ctx.buf_for(node.parents[0], "condition")?;
    if cond.writable {
        w.line(format!("let condition = unsafe {{ &*{}.get() }}[0];", cond.ident));
    } else {
        w.line(format!("let condition = {}[0];", cond.ident));
    }
    let zero = if cond.ring == Ring::Float32 { "0.0" } else { "0" };

    // A taken branch re-enters its region by pushing the region's
    // runnable roots; the cascade through their children does the rest.
    let pushes = |w: &mut SourceWriter, target: NodeId| -> Result<()> {
        for pos in super::while_branch_pushes(ctx, node.id, target)? {
            w.line(format!("ctx.push({pos});"));
        }
        Ok(())
    };

    match (node.branch_true, node.branch_false) {
        (Some(t), Some(f)) => {
            w.open(format!("if condition != {zero} {{"));
            pushes(w, t)?;
            w.close("}");
            w.open("else {");
            pushes(w, f)?;
            w.close("}");
        }
        (Some(t), None) => {
            w.open(format!("if condition != {zero} {{"));
            pushes(w, t)?;
            w.close("}");
        }
        (None, Some(f)) => {
            w.open(format!("if condition == {zero} {{"));
            pushes(w, f)?;
            w.close("}");
        }
        (None, None) => {
            w.line("let _ = condition;");
        }
    }
    Ok(())
}
