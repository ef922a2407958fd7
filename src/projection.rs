/// Row projection strategies
///
/// A projection turns one [`LookupResult`] into the values of the row's output
/// cells. It is pure: the engine owns control flow, the projection only
/// decides what lands in each column.
use crate::errors::AppError;
use crate::models::LookupResult;
use std::fmt;
use std::str::FromStr;

/// Prefix of the error marker written into output cells.
pub const ERROR_MARKER_PREFIX: &str = "ERRO: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// One column: registration status description.
    Situacao,
    /// Two columns: primary CNAE, then the first allow-listed secondary CNAE.
    Cnae,
}

impl Projection {
    /// Number of output cells this projection fills.
    pub fn arity(&self) -> usize {
        match self {
            Projection::Situacao => 1,
            Projection::Cnae => 2,
        }
    }

    /// Output columns used when none are configured.
    pub fn default_output_columns(&self) -> Vec<usize> {
        match self {
            Projection::Situacao => vec![6],
            Projection::Cnae => vec![1, 0],
        }
    }

    /// Values for the output cells, in configured column order.
    ///
    /// `None` leaves the cell as it was. On failure only the first cell gets
    /// the error marker.
    pub fn project(&self, result: &LookupResult) -> Vec<Option<String>> {
        match (self, result) {
            (Projection::Situacao, LookupResult::Success(record)) => {
                vec![Some(record.situacao.clone())]
            }
            (Projection::Cnae, LookupResult::Success(record)) => vec![
                Some(record.cnae_principal.clone().unwrap_or_default()),
                record.cnae_secundario.clone(),
            ],
            (_, failure) => {
                let mut cells = vec![None; self.arity()];
                cells[0] = Some(error_marker(failure.error().unwrap_or_default()));
                cells
            }
        }
    }
}

/// Error marker for an output cell.
pub fn error_marker(reason: &str) -> String {
    format!("{}{}", ERROR_MARKER_PREFIX, reason)
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Situacao => f.write_str("situacao"),
            Projection::Cnae => f.write_str("cnae"),
        }
    }
}

impl FromStr for Projection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "situacao" | "status" => Ok(Projection::Situacao),
            "cnae" | "classificacao" => Ok(Projection::Cnae),
            other => Err(AppError::Config(format!(
                "Unknown projection '{}', expected 'situacao' or 'cnae'",
                other
            ))),
        }
    }
}
