//! Static description of the recognized UPF blocks and their fields.

use semver::Version;

/// How long a real array must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// Exactly `header.mesh_size` points.
    Mesh,
    /// At most `header.mesh_size` points (projectors stop at their cutoff).
    UpToMesh,
    /// `header.number_of_proj` squared (the D_ij matrix, row major).
    ProjSquared,
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Int,
    Float,
    Bool,
    Array(Extent),
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Str => "a string",
            FieldKind::Int => "an integer",
            FieldKind::Float => "a real number",
            FieldKind::Bool => "a logical (T/F)",
            FieldKind::Array(_) => "a real array",
        }
    }
}

/// Which schema versions a field or block exists in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applies {
    All,
    /// UPF 2.0.0 and later.
    Modern,
}

impl Applies {
    pub fn includes(&self, version: &Version) -> bool {
        match self {
            Applies::All => true,
            Applies::Modern => version.major >= 2,
        }
    }
}

#[derive(Debug)]
pub struct FieldSchema {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub applies: Applies,
}

#[derive(Debug, Clone, Copy)]
pub enum ChildShape {
    /// The child carries only a payload, e.g. `<PP_R>` holds the radial grid.
    Payload(FieldKind),
    /// The child carries attributes and possibly a payload, e.g. `<PP_CHI.1>`.
    Record(&'static [FieldSchema]),
}

#[derive(Debug)]
pub struct ChildSchema {
    pub key: &'static str,
    /// Tag without the `.N` suffix.
    pub tag: &'static str,
    pub list: bool,
    pub required: bool,
    pub shape: ChildShape,
}

#[derive(Debug)]
pub struct BlockSchema {
    pub key: &'static str,
    pub tag: &'static str,
    pub required: bool,
    pub applies: Applies,
    pub fields: &'static [FieldSchema],
    pub children: &'static [ChildSchema],
}

impl BlockSchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn child(&self, key: &str) -> Option<&'static ChildSchema> {
        self.children.iter().find(|c| c.key == key)
    }

    /// The kind a field must have, whether it sits on the block or is a payload child.
    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        if let Some(f) = self.field(name) {
            return Some(f.kind);
        }

        match self.child(name)?.shape {
            ChildShape::Payload(kind) => Some(kind),
            ChildShape::Record(_) => None,
        }
    }
}

pub fn field_of(fields: &'static [FieldSchema], name: &str) -> Option<&'static FieldSchema> {
    fields.iter().find(|f| f.name == name)
}

const fn req(name: &'static str, kind: FieldKind) -> FieldSchema {
    FieldSchema {
        name,
        kind,
        required: true,
        applies: Applies::All,
    }
}

const fn opt(name: &'static str, kind: FieldKind) -> FieldSchema {
    FieldSchema {
        name,
        kind,
        required: false,
        applies: Applies::All,
    }
}

const fn v2(name: &'static str, kind: FieldKind) -> FieldSchema {
    FieldSchema {
        name,
        kind,
        required: false,
        applies: Applies::Modern,
    }
}

use FieldKind::{Bool, Float, Int, Str};

const MESH_VALUES: FieldKind = FieldKind::Array(Extent::Mesh);

static HEADER_FIELDS: &[FieldSchema] = &[
    v2("generated", Str),
    v2("author", Str),
    v2("date", Str),
    v2("comment", Str),
    req("element", Str),
    req("pseudo_type", Str),
    v2("relativistic", Str),
    opt("is_ultrasoft", Bool),
    opt("is_paw", Bool),
    v2("is_coulomb", Bool),
    v2("has_so", Bool),
    v2("has_wfc", Bool),
    v2("has_gipaw", Bool),
    v2("paw_as_gipaw", Bool),
    req("core_correction", Bool),
    opt("functional", Str),
    req("z_valence", Float),
    opt("total_psenergy", Float),
    opt("wfc_cutoff", Float),
    opt("rho_cutoff", Float),
    req("l_max", Int),
    v2("l_max_rho", Int),
    v2("l_local", Int),
    req("mesh_size", Int),
    req("number_of_wfc", Int),
    req("number_of_proj", Int),
];

static INFO_FIELDS: &[FieldSchema] = &[opt("text", Str)];

static INFO_CHILDREN: &[ChildSchema] = &[ChildSchema {
    key: "inputfile",
    tag: "PP_INPUTFILE",
    list: false,
    required: false,
    shape: ChildShape::Payload(Str),
}];

static MESH_FIELDS: &[FieldSchema] = &[
    v2("dx", Float),
    v2("mesh", Int),
    v2("xmin", Float),
    v2("rmax", Float),
    v2("zmesh", Float),
];

static MESH_CHILDREN: &[ChildSchema] = &[
    ChildSchema {
        key: "r",
        tag: "PP_R",
        list: false,
        required: true,
        shape: ChildShape::Payload(MESH_VALUES),
    },
    ChildSchema {
        key: "rab",
        tag: "PP_RAB",
        list: false,
        required: true,
        shape: ChildShape::Payload(MESH_VALUES),
    },
];

static RADIAL_FIELDS: &[FieldSchema] = &[req("values", MESH_VALUES)];

static BETA_FIELDS: &[FieldSchema] = &[
    opt("index", Int),
    opt("label", Str),
    req("angular_momentum", Int),
    opt("cutoff_radius_index", Int),
    opt("cutoff_radius", Float),
    opt("ultrasoft_cutoff_radius", Float),
    req("values", FieldKind::Array(Extent::UpToMesh)),
];

static NONLOCAL_CHILDREN: &[ChildSchema] = &[
    ChildSchema {
        key: "beta",
        tag: "PP_BETA",
        list: true,
        required: false,
        shape: ChildShape::Record(BETA_FIELDS),
    },
    ChildSchema {
        key: "dij",
        tag: "PP_DIJ",
        list: false,
        required: false,
        shape: ChildShape::Payload(FieldKind::Array(Extent::ProjSquared)),
    },
];

pub(crate) static CHI_FIELDS: &[FieldSchema] = &[
    opt("index", Int),
    req("label", Str),
    opt("n", Int),
    req("l", Int),
    req("occupation", Float),
    opt("pseudo_energy", Float),
    opt("cutoff_radius", Float),
    opt("ultrasoft_cutoff_radius", Float),
    req("values", MESH_VALUES),
];

static PSWFC_CHILDREN: &[ChildSchema] = &[ChildSchema {
    key: "chi",
    tag: "PP_CHI",
    list: true,
    required: false,
    shape: ChildShape::Record(CHI_FIELDS),
}];

static FULL_WFC_FIELDS: &[FieldSchema] = &[opt("number_of_wfc", Int)];

static FULL_WFC_ENTRY: &[FieldSchema] = &[
    opt("index", Int),
    opt("label", Str),
    opt("l", Int),
    req("values", MESH_VALUES),
];

static FULL_WFC_CHILDREN: &[ChildSchema] = &[
    ChildSchema {
        key: "aewfc",
        tag: "PP_AEWFC",
        list: true,
        required: false,
        shape: ChildShape::Record(FULL_WFC_ENTRY),
    },
    ChildSchema {
        key: "pswfc",
        tag: "PP_PSWFC",
        list: true,
        required: false,
        shape: ChildShape::Record(FULL_WFC_ENTRY),
    },
];

static RELWFC_FIELDS: &[FieldSchema] = &[
    opt("index", Int),
    opt("els", Str),
    opt("nn", Int),
    req("lchi", Int),
    req("jchi", Float),
    opt("oc", Float),
];

static RELBETA_FIELDS: &[FieldSchema] = &[
    opt("index", Int),
    req("lll", Int),
    req("jjj", Float),
];

static SPIN_ORB_CHILDREN: &[ChildSchema] = &[
    ChildSchema {
        key: "relwfc",
        tag: "PP_RELWFC",
        list: true,
        required: false,
        shape: ChildShape::Record(RELWFC_FIELDS),
    },
    ChildSchema {
        key: "relbeta",
        tag: "PP_RELBETA",
        list: true,
        required: false,
        shape: ChildShape::Record(RELBETA_FIELDS),
    },
];

static VNL_FIELDS: &[FieldSchema] = &[
    req("l", Int),
    opt("j", Float),
    req("values", MESH_VALUES),
];

static SEMILOCAL_CHILDREN: &[ChildSchema] = &[ChildSchema {
    key: "vnl",
    tag: "PP_VNL",
    list: true,
    required: false,
    shape: ChildShape::Record(VNL_FIELDS),
}];

pub static BLOCKS: &[BlockSchema] = &[
    BlockSchema {
        key: "info",
        tag: "PP_INFO",
        required: false,
        applies: Applies::All,
        fields: INFO_FIELDS,
        children: INFO_CHILDREN,
    },
    BlockSchema {
        key: "header",
        tag: "PP_HEADER",
        required: true,
        applies: Applies::All,
        fields: HEADER_FIELDS,
        children: &[],
    },
    BlockSchema {
        key: "mesh",
        tag: "PP_MESH",
        required: true,
        applies: Applies::All,
        fields: MESH_FIELDS,
        children: MESH_CHILDREN,
    },
    BlockSchema {
        key: "nlcc",
        tag: "PP_NLCC",
        required: false,
        applies: Applies::All,
        fields: RADIAL_FIELDS,
        children: &[],
    },
    BlockSchema {
        key: "local",
        tag: "PP_LOCAL",
        required: true,
        applies: Applies::All,
        fields: RADIAL_FIELDS,
        children: &[],
    },
    BlockSchema {
        key: "nonlocal",
        tag: "PP_NONLOCAL",
        required: true,
        applies: Applies::All,
        fields: &[],
        children: NONLOCAL_CHILDREN,
    },
    BlockSchema {
        key: "semilocal",
        tag: "PP_SEMILOCAL",
        required: false,
        applies: Applies::Modern,
        fields: &[],
        children: SEMILOCAL_CHILDREN,
    },
    BlockSchema {
        key: "pswfc",
        tag: "PP_PSWFC",
        required: true,
        applies: Applies::All,
        fields: &[],
        children: PSWFC_CHILDREN,
    },
    BlockSchema {
        key: "full_wfc",
        tag: "PP_FULL_WFC",
        required: false,
        applies: Applies::Modern,
        fields: FULL_WFC_FIELDS,
        children: FULL_WFC_CHILDREN,
    },
    BlockSchema {
        key: "rhoatom",
        tag: "PP_RHOATOM",
        required: false,
        applies: Applies::All,
        fields: RADIAL_FIELDS,
        children: &[],
    },
    BlockSchema {
        key: "spin_orb",
        tag: "PP_SPIN_ORB",
        required: false,
        applies: Applies::Modern,
        fields: &[],
        children: SPIN_ORB_CHILDREN,
    },
];

pub fn block_by_key(key: &str) -> Option<&'static BlockSchema> {
    BLOCKS.iter().find(|b| b.key == key)
}

pub fn block_by_tag(tag: &str) -> Option<&'static BlockSchema> {
    BLOCKS.iter().find(|b| b.tag == tag)
}

/// `PP_CHI.2` -> (`chi`, Some(2)); `PP_R` -> (`r`, None).
pub fn child_key(tag: &str) -> (String, Option<usize>) {
    let (base, number) = match tag.split_once('.') {
        Some((base, rest)) => (base, rest.parse().ok()),
        None => (tag, None),
    };

    let key = base.strip_prefix("PP_").unwrap_or(base).to_lowercase();
    (key, number)
}

/// Inverse of [`child_key`] for output.
pub fn child_tag(parent: Option<&BlockSchema>, key: &str) -> String {
    parent
        .and_then(|p| p.child(key))
        .map(|c| c.tag.to_string())
        .unwrap_or_else(|| format!("PP_{}", key.to_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_key() {
        assert_eq!(child_key("PP_CHI.2"), ("chi".to_string(), Some(2)));
        assert_eq!(child_key("PP_R"), ("r".to_string(), None));
        assert_eq!(child_key("PP_RELBETA.10"), ("relbeta".to_string(), Some(10)));
    }

    #[test]
    fn test_child_tag_roundtrip() {
        let nonlocal = block_by_key("nonlocal");
        assert_eq!(child_tag(nonlocal, "beta"), "PP_BETA");
        assert_eq!(child_tag(nonlocal, "augmentation"), "PP_AUGMENTATION");
    }

    #[test]
    fn test_required_blocks() {
        let required: Vec<&str> = BLOCKS.iter().filter(|b| b.required).map(|b| b.key).collect();
        assert_eq!(required, vec!["header", "mesh", "local", "nonlocal", "pswfc"]);
    }

    #[test]
    fn test_version_applicability() {
        let header = block_by_key("header").unwrap();
        let l_local = header.field("l_local").unwrap();

        assert!(!l_local.applies.includes(&Version::new(1, 0, 0)));
        assert!(l_local.applies.includes(&Version::new(2, 0, 1)));
        assert_eq!(header.kind_of("mesh_size"), Some(FieldKind::Int));
        assert_eq!(block_by_key("mesh").unwrap().kind_of("r"), Some(MESH_VALUES));
    }
}
