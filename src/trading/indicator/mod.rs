pub mod adx;
pub mod feature;
pub mod rma;
pub mod squeeze;
pub mod stat;
