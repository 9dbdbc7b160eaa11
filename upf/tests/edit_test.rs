use upf::*;

use std::path::PathBuf;

fn load(name: &str) -> UpfDocument {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("data").join(name);
    UpfDocument::from_text(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_set_scalar_and_write() {
    let mut doc = load("Si.pbe-nc.UPF");

    doc.set("header", "author", "someone else").unwrap();
    doc.set("header", "wfc_cutoff", 30i64).unwrap();

    let again = UpfDocument::from_text(&doc.to_text()).unwrap();
    assert_eq!(again.get_str("header", "author").unwrap(), "someone else");
    assert_eq!(again.get_f64("header", "wfc_cutoff").unwrap(), 30.0);
}

#[test]
fn test_set_array_checks_mesh() {
    let mut doc = load("Si.pbe-nc.UPF");
    let before = doc.clone();

    assert!(matches!(
        doc.set("rhoatom", "values", vec![0.0; 7]).unwrap_err(),
        UpfError::Consistency(ConsistencyError::LengthMismatch { expected: 8, found: 7, .. })
    ));
    assert_eq!(doc, before);

    doc.set("rhoatom", "values", vec![1.0; 8]).unwrap();
    assert_eq!(doc.get_array("rhoatom", "values").unwrap(), &[1.0; 8]);
}

#[test]
fn test_verbatim_block_is_not_editable() {
    let mut doc = load("Si.pbe-nc.UPF");

    assert_eq!(
        doc.set("PP_GIPAW_NOTES", "text", "x").unwrap_err(),
        UpfError::Schema(SchemaError::NotEditable("PP_GIPAW_NOTES".to_string()))
    );
}

#[test]
fn test_truncate_keeps_declarations_in_step() {
    let mut doc = load("Si.pbe-nc.UPF");
    doc.truncate_mesh(5).unwrap();

    assert_eq!(doc.get_usize("header", "mesh_size").unwrap(), 5);
    assert_eq!(doc.get_usize("mesh", "mesh").unwrap(), 5);
    assert_eq!(doc.get_f64("mesh", "rmax").unwrap(), 0.1);
    assert_eq!(doc.get_array("nlcc", "values").unwrap().len(), 5);
    assert_eq!(doc.get_array("rhoatom", "values").unwrap().len(), 5);

    for beta in doc.beta_projectors().unwrap() {
        assert_eq!(beta.values.len(), 5);
        assert_eq!(beta.cutoff_radius_index, Some(5));
    }
    assert!(doc.pseudo_wavefunctions().unwrap().iter().all(|c| c.values.len() == 5));

    // dij does not depend on the mesh
    assert_eq!(doc.get_array("nonlocal", "dij").unwrap().len(), 4);

    let again = UpfDocument::from_text(&doc.to_text()).unwrap();
    assert_eq!(again, doc);
}

#[test]
fn test_truncate_legacy_document() {
    let mut doc = load("O.pz-legacy.UPF");
    doc.truncate_mesh(5).unwrap();

    assert_eq!(doc.get_usize("header", "mesh_size").unwrap(), 5);
    assert!(doc.get("mesh", "mesh").is_err());

    let betas = doc.beta_projectors().unwrap();
    assert_eq!(betas[0].values.len(), 5);
    assert_eq!(betas[0].cutoff_radius_index, Some(5));
    assert_eq!(betas[1].values.len(), 5);
}

#[test]
fn test_truncate_beyond_mesh_changes_nothing() {
    let mut doc = load("Si.pbe-nc.UPF");
    let before = doc.clone();

    assert!(matches!(
        doc.truncate_mesh(9).unwrap_err(),
        UpfError::Consistency(ConsistencyError::ExceedsMesh { mesh_size: 8, found: 9, .. })
    ));
    assert_eq!(doc, before);
}

#[test]
fn test_reorder_then_write() {
    let mut doc = load("Si.pbe-nc.UPF");
    doc.reorder_blocks(&["header", "info"]).unwrap();

    let text = doc.to_text();
    let header = text.find("<PP_HEADER").unwrap();
    let info = text.find("<PP_INFO>").unwrap();
    assert!(header < info);

    let again = UpfDocument::from_text(&text).unwrap();
    let keys: Vec<&str> = again.keys().collect();
    assert_eq!(&keys[..3], &["header", "info", "mesh"]);
}
