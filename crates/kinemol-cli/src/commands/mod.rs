pub mod hessian;
pub mod md;
pub mod sp;
