//! The four dispatch methods behind [`WorkShare::next`](crate::WorkShare::next).

pub(crate) mod adaptive;
pub(crate) mod dynamic;
pub(crate) mod guided;
pub(crate) mod static_;
