use crate::document::UpfDocument;
use crate::error::{ConsistencyError, Result, SchemaError, UpfError};
use crate::value::VALUES;

const RY_TO_HA: f64 = 0.5;

/// Radial data of one pseudopotential as a plane-wave code consumes it.
/// Energies are in Rydberg, as stored in the file, unless the name says `_ha`.
pub trait AtomPSP {
    /// valence electron number
    fn get_zion(&self) -> Result<f64>;

    fn get_lmax(&self) -> Result<usize>;

    /// angular momentum of the local channel, 0 when the file does not say
    fn get_lloc(&self) -> Result<i32>;

    fn get_mmax(&self) -> Result<usize>;
    fn get_nbeta(&self) -> Result<usize>;
    fn get_lbeta(&self, ibeta: usize) -> Result<usize>;
    fn get_beta(&self, ibeta: usize) -> Result<&[f64]>;

    /// diagonal of dij for one projector
    fn get_dfact(&self, ibeta: usize) -> Result<f64>;

    fn get_rad(&self) -> Result<&[f64]>;
    fn get_rab(&self) -> Result<&[f64]>;
    fn get_vloc(&self) -> Result<&[f64]>;
    fn get_rho(&self) -> Result<&[f64]>;
    fn get_nlcc(&self) -> Result<bool>;

    /// empty without core correction
    fn get_rhocore(&self) -> Result<&[f64]>;

    /// first pseudo-wavefunction with angular momentum `l`
    fn get_wfc(&self, l: usize) -> Result<&[f64]>;

    fn get_vloc_ha(&self) -> Result<Vec<f64>> {
        Ok(self.get_vloc()?.iter().map(|v| v * RY_TO_HA).collect())
    }

    fn get_dfact_ha(&self, ibeta: usize) -> Result<f64> {
        Ok(self.get_dfact(ibeta)? / RY_TO_HA)
    }
}

impl UpfDocument {
    fn check_beta(&self, ibeta: usize) -> Result<usize> {
        let nbeta = self.get_nbeta()?;

        if ibeta >= nbeta {
            return Err(ConsistencyError::IndexOutOfRange {
                block: "nonlocal".to_string(),
                field: "beta".to_string(),
                index: ibeta as i64,
                bound: nbeta,
            }
            .into());
        }

        Ok(nbeta)
    }
}

impl AtomPSP for UpfDocument {
    fn get_zion(&self) -> Result<f64> {
        self.get_f64("header", "z_valence")
    }

    fn get_lmax(&self) -> Result<usize> {
        self.get_usize("header", "l_max")
    }

    fn get_lloc(&self) -> Result<i32> {
        match self.get_i64("header", "l_local") {
            Ok(l) => Ok(l as i32),
            Err(UpfError::Schema(SchemaError::MissingField { .. })) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn get_mmax(&self) -> Result<usize> {
        self.get_usize("header", "mesh_size")
    }

    fn get_nbeta(&self) -> Result<usize> {
        Ok(self.beta_projectors()?.len())
    }

    fn get_lbeta(&self, ibeta: usize) -> Result<usize> {
        self.check_beta(ibeta)?;
        Ok(self.beta_projectors()?[ibeta].angular_momentum)
    }

    fn get_beta(&self, ibeta: usize) -> Result<&[f64]> {
        self.check_beta(ibeta)?;
        Ok(self.beta_projectors()?[ibeta].values)
    }

    fn get_dfact(&self, ibeta: usize) -> Result<f64> {
        self.check_beta(ibeta)?;
        let nproj = self.get_usize("header", "number_of_proj")?;
        let dij = self.get_array("nonlocal", "dij")?;

        dij.get(ibeta * nproj + ibeta).copied().ok_or_else(|| {
            ConsistencyError::LengthMismatch {
                block: "nonlocal".to_string(),
                field: "dij".to_string(),
                expected: nproj * nproj,
                found: dij.len(),
            }
            .into()
        })
    }

    fn get_rad(&self) -> Result<&[f64]> {
        self.get_array("mesh", "r")
    }

    fn get_rab(&self) -> Result<&[f64]> {
        self.get_array("mesh", "rab")
    }

    fn get_vloc(&self) -> Result<&[f64]> {
        self.get_array("local", VALUES)
    }

    fn get_rho(&self) -> Result<&[f64]> {
        self.get_array("rhoatom", VALUES)
    }

    fn get_nlcc(&self) -> Result<bool> {
        self.get_bool("header", "core_correction")
    }

    fn get_rhocore(&self) -> Result<&[f64]> {
        if !self.get_nlcc()? {
            return Ok(&[]);
        }

        self.get_array("nlcc", VALUES)
    }

    fn get_wfc(&self, l: usize) -> Result<&[f64]> {
        self.pseudo_wavefunctions()?
            .into_iter()
            .find(|chi| chi.l == l)
            .map(|chi| chi.values)
            .ok_or_else(|| {
                SchemaError::MissingField {
                    block: "pswfc".to_string(),
                    field: format!("chi with l = {}", l),
                }
                .into()
            })
    }
}
