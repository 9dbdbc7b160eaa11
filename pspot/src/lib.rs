use upf::{AtomPSP, UpfDocument, UpfError, WriteOptions};

use log::{info, warn};
use thiserror::Error;

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

#[derive(Debug, Error)]
pub enum PSPotError {
    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: expected 'species file', found '{text}'", .path.display())]
    Table {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("{}:{line}: species '{species}' is listed twice", .path.display())]
    DuplicateSpecies {
        path: PathBuf,
        line: usize,
        species: String,
    },

    #[error("{}: {source}", .path.display())]
    Upf {
        path: PathBuf,
        #[source]
        source: UpfError,
    },

    #[error("no pseudopotential for species '{0}'")]
    UnknownSpecies(String),
}

#[derive(Debug, Default)]
pub struct PSPot {
    pots: HashMap<String, UpfDocument>,
    atpsp_file: Vec<(String, PathBuf)>,
}

impl PSPot {
    /// Load every pseudopotential listed in a species table.
    pub fn from_table<P: AsRef<Path>>(table: P) -> Result<PSPot, PSPotError> {
        let pspfiles = get_psp_files(table)?;

        let mut pots = HashMap::new();

        for (sp, spfile) in pspfiles.iter() {
            let psp_one = read_upf_file(spfile)?;
            pots.insert(sp.clone(), psp_one);
        }

        Ok(PSPot {
            pots,
            atpsp_file: pspfiles,
        })
    }

    pub fn get_psp(&self, sp: &str) -> Result<&UpfDocument, PSPotError> {
        self.pots
            .get(sp)
            .ok_or_else(|| PSPotError::UnknownSpecies(sp.to_string()))
    }

    /// Species in table order.
    pub fn species(&self) -> impl Iterator<Item = &str> {
        self.atpsp_file.iter().map(|(sp, _)| sp.as_str())
    }

    pub fn get_max_lmax(&self) -> Result<usize, PSPotError> {
        let mut max_lmax = 0;

        for (sp, file) in self.atpsp_file.iter() {
            let lmax = self.get_psp(sp)?.get_lmax().map_err(|source| PSPotError::Upf {
                path: file.clone(),
                source,
            })?;

            if lmax > max_lmax {
                max_lmax = lmax;
            }
        }

        Ok(max_lmax)
    }

    pub fn display(&self) {
        for (sp, file) in self.atpsp_file.iter() {
            println!("   {} : {}", sp, file.display());
        }
    }
}

/// Read a species table: one `species file` pair per line, `#` starts a
/// comment. Files are resolved against the directory of the table.
pub fn get_psp_files<P: AsRef<Path>>(inpfile: P) -> Result<Vec<(String, PathBuf)>, PSPotError> {
    let inpfile = inpfile.as_ref();
    let io_error = |source| PSPotError::Io {
        path: inpfile.to_path_buf(),
        source,
    };

    let file = File::open(inpfile).map_err(io_error)?;
    let dir = inpfile.parent().unwrap_or_else(|| Path::new(""));

    let mut pspmap: Vec<(String, PathBuf)> = Vec::new();

    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_error)?;
        let content = line.split('#').next().unwrap_or_default();

        let s: Vec<&str> = content.split_whitespace().collect();
        if s.is_empty() {
            continue;
        }

        let [specie, psp] = s.as_slice() else {
            return Err(PSPotError::Table {
                path: inpfile.to_path_buf(),
                line: i + 1,
                text: line.trim().to_string(),
            });
        };

        if pspmap.iter().any(|(sp, _)| sp == specie) {
            return Err(PSPotError::DuplicateSpecies {
                path: inpfile.to_path_buf(),
                line: i + 1,
                species: specie.to_string(),
            });
        }

        pspmap.push((specie.to_string(), dir.join(psp)));
    }

    Ok(pspmap)
}

pub fn read_upf_file<P: AsRef<Path>>(path: P) -> Result<UpfDocument, PSPotError> {
    let path = path.as_ref();

    let bytes = fs::read(path).map_err(|source| PSPotError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let doc = UpfDocument::from_bytes(&bytes).map_err(|source| PSPotError::Upf {
        path: path.to_path_buf(),
        source,
    })?;

    for w in doc.warnings() {
        warn!("{}: {}", path.display(), w);
    }

    info!("loaded {} (UPF v{})", path.display(), doc.version());

    Ok(doc)
}

pub fn write_upf_file<P: AsRef<Path>>(
    path: P,
    doc: &UpfDocument,
    options: &WriteOptions,
) -> Result<(), PSPotError> {
    let path = path.as_ref();

    fs::write(path, doc.to_text_with(options)).map_err(|source| PSPotError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!("wrote {}", path.display());

    Ok(())
}
