// Domain layer: planning models and ports (interfaces). Concrete
// implementations live under adapters/ and config/.

pub mod model;
pub mod ports;
