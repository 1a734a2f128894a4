//! End-to-end numeric scenarios: node tables whose kernels have exactly
//! the shape the emitter generates, run on the real engine, checked
//! against the closed-form results.

use std::sync::Mutex;
use tensorlace::runtime::{NodeRecord, PushCtx, Slab, run};
use tensorlace::testing::{assert_slices_close, default_threads};

mod add_scale {
    use super::*;

    // sum = (1,2,3) + (4,5,6); prod = sum · 42
    pub static VEC1: [f32; 3] = [1.0, 2.0, 3.0];
    pub static VEC2: [f32; 3] = [4.0, 5.0, 6.0];
    pub static SCALAR: [f32; 1] = [42.0];
    pub static SUM: Slab<f32, 3> = Slab::new([0.0; 3]);
    pub static PROD: Slab<f32, 3> = Slab::new([0.0; 3]);
    pub static REPORTED: Mutex<Vec<[f32; 3]>> = Mutex::new(Vec::new());

    pub fn sum_kernel(_ctx: &PushCtx) {
        let out = unsafe { &mut *SUM.get() };
        for dim in 0..3 {
            out[dim] = VEC1[dim] + VEC2[dim];
        }
    }

    pub fn prod_kernel(_ctx: &PushCtx) {
        let vec = unsafe { &*SUM.get() };
        let out = unsafe { &mut *PROD.get() };
        for dim in 0..3 {
            out[dim] = vec[dim] * SCALAR[0];
        }
    }

    pub fn output_kernel(_ctx: &PushCtx) {
        let data = unsafe { &*PROD.get() };
        REPORTED.lock().unwrap().push(*data);
    }

    pub static NODES: [NodeRecord; 3] = [
        NodeRecord::new(sum_kernel, &[], &[1], 0),
        NodeRecord::new(prod_kernel, &[0], &[2], 1),
        NodeRecord::new(output_kernel, &[1], &[], 2),
    ];
}

#[test]
fn vec_add_then_scalar_product() {
    run(&add_scale::NODES, &[0], default_threads());
    let reported = add_scale::REPORTED.lock().unwrap();
    assert_eq!(reported.len(), 1);
    assert_slices_close(&reported[0], &[210.0, 294.0, 378.0], 0.0);
}

mod identity_product {
    use super::*;

    // M · I over the shared index, the emitter's contraction loop shape.
    pub static M: [f32; 9] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
    pub static I: [f32; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    pub static OUT: Slab<f32, 9> = Slab::new([0.0; 9]);

    pub fn contract_kernel(_ctx: &PushCtx) {
        let out = unsafe { &mut *OUT.get() };
        for op_index in 0..9 {
            let t = [op_index / 3, op_index % 3];
            let mut sum = 0.0f32;
            for d0 in 0..3 {
                sum += M[t[0] * 3 + d0] * I[d0 * 3 + t[1]];
            }
            out[op_index] = sum;
        }
    }

    pub static NODES: [NodeRecord; 1] = [NodeRecord::new(contract_kernel, &[], &[], 0)];
}

#[test]
fn matrix_identity_product_returns_the_matrix() {
    run(&identity_product::NODES, &[0], 2);
    let out = unsafe { &*identity_product::OUT.get() };
    assert_slices_close(out, &identity_product::M, 0.0);
}

mod transpose {
    use super::*;

    pub static M: [f32; 9] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
    pub static OUT: Slab<f32, 9> = Slab::new([0.0; 9]);

    // Permute([1, 0]): position j of the output carries input index
    // indices[j].
    pub fn permute_kernel(_ctx: &PushCtx) {
        let out = unsafe { &mut *OUT.get() };
        for op_index in 0..9 {
            let t = [op_index / 3, op_index % 3];
            let mut s = [0usize; 2];
            s[1] = t[0];
            s[0] = t[1];
            out[op_index] = M[s[0] * 3 + s[1]];
        }
    }

    pub static NODES: [NodeRecord; 1] = [NodeRecord::new(permute_kernel, &[], &[], 0)];
}

#[test]
fn transpose_via_permutation() {
    run(&transpose::NODES, &[0], 2);
    let out = unsafe { &*transpose::OUT.get() };
    assert_slices_close(out, &[1.0, 4.0, 7.0, 2.0, 5.0, 8.0, 3.0, 6.0, 9.0], 0.0);
}

mod trace {
    use super::*;

    // Total contraction of M with the doubled Kronecker delta: the delta
    // becomes an index-equality test times its scaling, never a buffer.
    pub static M: [f32; 9] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
    pub static OUT: Slab<f32, 1> = Slab::new([0.0]);
    pub static REPORTED: Mutex<Vec<f32>> = Mutex::new(Vec::new());

    pub fn trace_kernel(_ctx: &PushCtx) {
        let out = unsafe { &mut *OUT.get() };
        let mut sum = 0.0f32;
        for d0 in 0..3 {
            for d1 in 0..3 {
                let k = [d0, d1];
                if k[0] == k[1] {
                    sum += M[d0 * 3 + d1] * 2.0f32;
                }
            }
        }
        out[0] = sum;
    }

    pub fn output_kernel(_ctx: &PushCtx) {
        let data = unsafe { &*OUT.get() };
        REPORTED.lock().unwrap().push(data[0]);
    }

    pub static NODES: [NodeRecord; 2] = [
        NodeRecord::new(trace_kernel, &[], &[1], 0),
        NodeRecord::new(output_kernel, &[0], &[], 1),
    ];
}

#[test]
fn two_tensor_trace_is_exactly_thirty() {
    run(&trace::NODES, &[0], 2);
    let reported = trace::REPORTED.lock().unwrap();
    assert_eq!(reported.len(), 1);
    // (1 + 5 + 9) · 2 = 30, bit-exact in f32.
    assert_eq!(reported[0], 30.0f32);
}
