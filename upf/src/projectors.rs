//! Radial projectors in the `.dat` format read by pw2wannier90 and Wannier90.
//!
//! ```text
//! <npoints> <nproj>
//! <l of each projector>
//! <x> <r> <y_1> ... <y_nproj>     (one row per grid point)
//! ```
//!
//! `x` is the logarithmic grid, `r = exp(x)`.

use crate::document::UpfDocument;
use crate::error::{ConsistencyError, Result, SchemaError};
use crate::field::parse_fortran_f64;
use crate::serializer::scientific;
use itertools::Itertools;
use std::fmt;
use std::str::FromStr;

const DAT: &str = "dat";

/// Smallest radius put on the logarithmic grid of a `.dat` export.
const MIN_R: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq)]
pub struct Projector {
    x: Vec<f64>,
    pub y: Vec<f64>,
    pub l: usize,
}

impl Projector {
    /// Lower bound of the logarithmic grid.
    pub const X_MIN: f64 = -16.0;

    pub fn new(x: Vec<f64>, y: Vec<f64>, l: usize) -> Projector {
        let mut p = Projector { x: Vec::new(), y, l };
        p.set_x(x);
        p
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn set_x(&mut self, x: Vec<f64>) {
        self.x = x.into_iter().map(|v| v.max(Projector::X_MIN)).collect();
    }

    pub fn r(&self) -> Vec<f64> {
        self.x.iter().map(|x| x.exp()).collect()
    }

    pub fn set_r(&mut self, r: &[f64]) {
        self.set_x(r.iter().map(|r| r.ln()).collect());
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projectors {
    projectors: Vec<Projector>,
}

impl Projectors {
    pub fn new(projectors: Vec<Projector>) -> Projectors {
        Projectors { projectors }
    }

    pub fn len(&self) -> usize {
        self.projectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Projector> {
        self.projectors.iter()
    }

    pub fn get(&self, i: usize) -> Option<&Projector> {
        self.projectors.get(i)
    }

    pub fn push(&mut self, p: Projector) {
        self.projectors.push(p);
    }

    pub fn to_str(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Projectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(first) = self.projectors.first() else {
            return write!(f, "0 0\n");
        };

        writeln!(f, "{} {}", first.x.len(), self.projectors.len())?;
        write!(f, "{}", self.projectors.iter().map(|p| p.l).join(" "))?;

        for (i, (x, r)) in first.x.iter().zip(first.r()).enumerate() {
            let row = [*x, r]
                .into_iter()
                .chain(self.projectors.iter().map(|p| p.y.get(i).copied().unwrap_or(0.0)))
                .map(|v| format!("{:>18}", scientific(v, 12, 'e')))
                .join(" ");
            write!(f, "\n{}", row)?;
        }

        Ok(())
    }
}

impl FromStr for Projectors {
    type Err = crate::error::UpfError;

    fn from_str(s: &str) -> Result<Projectors> {
        let lines: Vec<&str> = s.lines().filter(|l| !l.trim().is_empty()).collect();

        let header = |field: &str| SchemaError::MissingField {
            block: DAT.to_string(),
            field: field.to_string(),
        };

        let npoints = lines.first().ok_or_else(|| header("size line"))?;
        let lvals = lines.get(1).ok_or_else(|| header("angular momenta"))?;

        let lvals: Vec<usize> = lvals
            .split_whitespace()
            .map(|t| {
                t.parse().map_err(|_| SchemaError::InvalidValue {
                    block: DAT.to_string(),
                    field: "l".to_string(),
                    token: t.to_string(),
                    expected: "a non-negative integer",
                })
            })
            .collect::<std::result::Result<_, _>>()?;

        let ncols = lvals.len() + 2;
        let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(lines.len()); ncols];

        for (irow, line) in lines.iter().skip(2).enumerate() {
            let row = format!("row {}", irow + 1);
            let values = line
                .split_whitespace()
                .map(|t| {
                    parse_fortran_f64(t).ok_or_else(|| SchemaError::InvalidValue {
                        block: DAT.to_string(),
                        field: row.clone(),
                        token: t.to_string(),
                        expected: "a real number",
                    })
                })
                .collect::<std::result::Result<Vec<f64>, _>>()?;

            if values.len() != ncols {
                return Err(ConsistencyError::LengthMismatch {
                    block: DAT.to_string(),
                    field: row,
                    expected: ncols,
                    found: values.len(),
                }
                .into());
            }

            for (column, v) in columns.iter_mut().zip(values) {
                column.push(v);
            }
        }

        if let Some(declared) = npoints.split_whitespace().next().and_then(|t| t.parse::<usize>().ok()) {
            if declared != columns[0].len() {
                return Err(ConsistencyError::LengthMismatch {
                    block: DAT.to_string(),
                    field: "rows".to_string(),
                    expected: declared,
                    found: columns[0].len(),
                }
                .into());
            }
        }

        let x = columns[0].clone();
        let projectors = lvals
            .into_iter()
            .zip(columns.into_iter().skip(2))
            .map(|(l, y)| Projector::new(x.clone(), y, l))
            .collect();

        Ok(Projectors { projectors })
    }
}

fn log_grid(r: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let r: Vec<f64> = r.iter().map(|r| r.max(MIN_R)).collect();
    let x = r.iter().map(|r| r.ln()).collect();
    (x, r)
}

impl UpfDocument {
    /// The pseudo-wavefunctions as a `.dat` projector file, sorted by `(l, n)`.
    pub fn to_dat(&self) -> Result<String> {
        let (x, r) = log_grid(self.get_array("mesh", "r")?);

        let mut chis = self.pseudo_wavefunctions()?;
        if chis.is_empty() {
            return Err(SchemaError::MissingField {
                block: "pswfc".to_string(),
                field: "chi".to_string(),
            }
            .into());
        }
        chis.sort_by_key(|chi| (chi.l, chi.n.unwrap_or(0)));

        let mut lines = vec![
            format!("{} {}", r.len(), chis.len()),
            chis.iter().map(|chi| chi.l).join(" "),
        ];

        for (i, (x, r)) in x.iter().zip(r.iter()).enumerate() {
            let values = chis
                .iter()
                .map(|chi| format!("{:>25}", scientific(chi.values.get(i).copied().unwrap_or(0.0), 15, 'e')))
                .join(" ");
            lines.push(format!("{:20.15} {:20.15} {}", x, r, values));
        }

        Ok(lines.join("\n"))
    }

    /// Same data as [`UpfDocument::to_dat`], as projectors.
    pub fn to_projectors(&self) -> Result<Projectors> {
        let (x, _) = log_grid(self.get_array("mesh", "r")?);

        let mut chis = self.pseudo_wavefunctions()?;
        chis.sort_by_key(|chi| (chi.l, chi.n.unwrap_or(0)));

        Ok(Projectors::new(
            chis.iter()
                .map(|chi| Projector::new(x.clone(), chi.values.to_vec(), chi.l))
                .collect(),
        ))
    }
}
