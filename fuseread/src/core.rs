pub mod align;
pub mod breakpoints;
pub mod collect;
pub mod dispatch;
pub mod filter;
pub mod pipeline;
