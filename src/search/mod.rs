pub mod dispatch;
pub mod terms;
