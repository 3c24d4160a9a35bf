pub mod fused;
pub mod matmul;
pub mod shape;
