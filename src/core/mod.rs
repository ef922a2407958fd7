// Domain-layer modules and shared errors/models
pub mod cnpj {
    pub use crate::cnpj::*;
}

pub mod enrichment {
    pub use crate::enrichment::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod projection {
    pub use crate::projection::*;
}

pub mod errors {
    pub use crate::errors::*;
}
