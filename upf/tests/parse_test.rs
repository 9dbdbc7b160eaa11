use upf::*;

use semver::Version;
use std::path::PathBuf;

fn data_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("data").join(name)
}

fn read(name: &str) -> String {
    std::fs::read_to_string(data_file(name)).unwrap()
}

#[test]
fn test_modern_file() {
    let doc = UpfDocument::from_text(&read("Si.pbe-nc.UPF")).unwrap();

    assert_eq!(doc.version(), &Version::new(2, 0, 1));
    assert_eq!(doc.markup(), Markup::Xml);
    assert!(doc.warnings().is_empty());

    let keys: Vec<&str> = doc.keys().collect();
    assert_eq!(
        keys,
        vec!["info", "header", "mesh", "nlcc", "local", "nonlocal", "pswfc", "rhoatom", "PP_GIPAW_NOTES"]
    );

    assert_eq!(doc.get_str("header", "element").unwrap(), "Si");
    assert_eq!(doc.get_f64("header", "z_valence").unwrap(), 4.0);
    assert_eq!(doc.get_i64("header", "l_local").unwrap(), -1);
    assert!(doc.get_bool("header", "core_correction").unwrap());
    assert_eq!(doc.get_str("header", "comment").unwrap(), "");
    assert_eq!(doc.get_f64("mesh", "rmax").unwrap(), 1.0);
    assert_eq!(doc.get_array("mesh", "r").unwrap().len(), 8);
    assert_eq!(doc.get_array("nonlocal", "dij").unwrap(), &[1.25, 0.0, 0.0, -0.75]);

    match doc.block("PP_GIPAW_NOTES") {
        Some(BlockContent::Verbatim(text)) => {
            assert!(text.starts_with("<PP_GIPAW_NOTES>"));
            assert!(text.contains("kept as written"));
        }
        other => panic!("unexpected block content {:?}", other),
    }
}

#[test]
fn test_pseudo_wavefunctions() {
    let doc = UpfDocument::from_text(&read("Si.pbe-nc.UPF")).unwrap();
    let chis = doc.pseudo_wavefunctions().unwrap();

    assert_eq!(chis.len(), 3);

    let labels: Vec<&str> = chis.iter().map(|c| c.label).collect();
    assert_eq!(labels, vec!["3S", "3D", "3P"]);

    let l: Vec<usize> = chis.iter().map(|c| c.l).collect();
    assert_eq!(l, vec![0, 2, 1]);

    let occupations: Vec<f64> = chis.iter().map(|c| c.occupation).collect();
    assert_eq!(occupations, vec![2.0, 0.0, 2.0]);

    assert!(chis.iter().all(|c| c.n == Some(3) && c.values.len() == 8));
}

#[test]
fn test_beta_projectors() {
    let doc = UpfDocument::from_text(&read("Si.pbe-nc.UPF")).unwrap();
    let betas = doc.beta_projectors().unwrap();

    assert_eq!(betas.len(), 2);
    assert_eq!(betas[1].index, Some(2));
    assert_eq!(betas[1].angular_momentum, 1);
    assert_eq!(betas[1].cutoff_radius_index, Some(6));
    assert_eq!(betas[0].values[0], 1.0);
}

#[test]
fn test_generator_input() {
    let modern = UpfDocument::from_text(&read("Si.pbe-nc.UPF")).unwrap();
    assert!(matches!(modern.generator_input(), Some(GeneratorInput::Oncvpsp(_))));

    let legacy = UpfDocument::from_text(&read("O.pz-legacy.UPF")).unwrap();
    let input = legacy.generator_input().unwrap();
    assert!(matches!(input, GeneratorInput::Ld1(_)));
    assert!(input.text().contains("config='[He] 2s2 2p4'"));
}

#[test]
fn test_legacy_file() {
    let doc = UpfDocument::from_text(&read("O.pz-legacy.UPF")).unwrap();

    assert_eq!(doc.version(), &Version::new(1, 0, 0));
    assert_eq!(doc.markup(), Markup::Legacy);
    assert!(doc.is_version_inferred());
    assert_eq!(
        doc.warnings(),
        &[UpfWarning::VersionInferred {
            assumed: Version::new(1, 0, 0)
        }]
    );

    assert_eq!(doc.get_str("header", "element").unwrap(), "O");
    assert_eq!(doc.get_str("header", "functional").unwrap(), "SLA PZ NOGX NOGC PZ");
    assert_eq!(doc.get_f64("header", "total_psenergy").unwrap(), -31.4765);
    assert!(doc.get_bool("header", "core_correction").unwrap());
    assert!(!doc.get_bool("header", "is_ultrasoft").unwrap());

    // -1.0D+02
    assert_eq!(doc.get_array("local", "values").unwrap()[0], -100.0);
    assert_eq!(doc.get_array("mesh", "r").unwrap()[7], 1.0);

    let betas = doc.beta_projectors().unwrap();
    assert_eq!(betas.len(), 2);
    assert_eq!(betas[1].cutoff_radius_index, Some(5));
    assert_eq!(betas[1].values.len(), 5);
    assert_eq!(doc.get_array("nonlocal", "dij").unwrap(), &[2.5, 0.0, 0.0, -1.5]);

    let chis = doc.pseudo_wavefunctions().unwrap();
    assert_eq!(chis.len(), 2);
    assert_eq!(chis[1].label, "2P");
    assert_eq!(chis[1].n, Some(2));
    assert_eq!(chis[1].occupation, 4.0);
}

#[test]
fn test_unmatched_marker_names_the_block() {
    let text = read("Si.pbe-nc.UPF").replace("</PP_RHOATOM>", "");

    match UpfDocument::from_text(&text).unwrap_err() {
        UpfError::Format(FormatError::UnmatchedStart { block, .. }) => assert_eq!(block, "PP_RHOATOM"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_bad_float_names_the_field() {
    let text = read("Si.pbe-nc.UPF").replace("z_valence=\"    4.00000000000000E+00\"", "z_valence=\"four\"");

    assert_eq!(
        UpfDocument::from_text(&text).unwrap_err(),
        UpfError::Schema(SchemaError::InvalidValue {
            block: "header".to_string(),
            field: "z_valence".to_string(),
            token: "four".to_string(),
            expected: "a real number",
        })
    );
}

#[test]
fn test_non_finite_reals_are_rejected() {
    let text = read("Si.pbe-nc.UPF").replace("z_valence=\"    4.00000000000000E+00\"", "z_valence=\"NaN\"");

    assert_eq!(
        UpfDocument::from_text(&text).unwrap_err(),
        UpfError::Schema(SchemaError::InvalidValue {
            block: "header".to_string(),
            field: "z_valence".to_string(),
            token: "NaN".to_string(),
            expected: "a real number",
        })
    );

    let text = read("Si.pbe-nc.UPF").replace("-7.9000000000E+00", "inf");

    match UpfDocument::from_text(&text).unwrap_err() {
        UpfError::Schema(SchemaError::InvalidValue { block, token, .. }) => {
            assert_eq!(block, "local");
            assert_eq!(token, "inf");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_bad_array_token_names_the_child() {
    let text = read("O.pz-legacy.UPF").replace("1.00000000000D+00  8.00000000000D-01", "1.00000000000D+00  8.0000xD-01");

    match UpfDocument::from_text(&text).unwrap_err() {
        UpfError::Schema(SchemaError::InvalidValue { block, field, token, .. }) => {
            assert_eq!(block, "nonlocal");
            assert_eq!(field, "beta.1.values");
            assert_eq!(token, "8.0000xD-01");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_short_mesh_array() {
    let text = read("O.pz-legacy.UPF").replace(" -9.00000000000D+00 -7.00000000000D+00", "");

    assert!(matches!(
        UpfDocument::from_text(&text).unwrap_err(),
        UpfError::Consistency(ConsistencyError::LengthMismatch { expected: 8, found: 6, .. })
    ));
}

#[test]
fn test_no_root_block() {
    assert_eq!(
        UpfDocument::from_text("just some text\n").unwrap_err(),
        UpfError::Format(FormatError::NoRootBlock)
    );
}

#[test]
fn test_latin1_bytes() {
    let text = read("Si.pbe-nc.UPF").replace("author=\"test\"", "author=\"J\u{00f6}rg\"");
    let (latin1, _, _) = encoding_rs::WINDOWS_1252.encode(&text);

    let doc = UpfDocument::from_bytes(&latin1).unwrap();

    assert_eq!(doc.warnings(), &[UpfWarning::Latin1Decoded]);
    assert_eq!(doc.get_str("header", "author").unwrap(), "J\u{00f6}rg");
}

#[test]
fn test_crlf_input() {
    let text = read("O.pz-legacy.UPF");
    let doc = UpfDocument::from_text(&text.replace('\n', "\r\n")).unwrap();

    assert_eq!(doc, UpfDocument::from_text(&text).unwrap());
}

#[test]
fn test_mesh_declarations_must_agree() {
    let text = read("Si.pbe-nc.UPF").replace("mesh=\"8\"", "mesh=\"9\"");

    assert_eq!(
        UpfDocument::from_text(&text).unwrap_err(),
        UpfError::Consistency(ConsistencyError::LengthMismatch {
            block: "mesh".to_string(),
            field: "mesh".to_string(),
            expected: 8,
            found: 9,
        })
    );
}

#[test]
fn test_declared_counts_must_match_children() {
    let text = read("Si.pbe-nc.UPF").replace("number_of_wfc=\"3\"", "number_of_wfc=\"7\"");

    assert_eq!(
        UpfDocument::from_text(&text).unwrap_err(),
        UpfError::Consistency(ConsistencyError::LengthMismatch {
            block: "pswfc".to_string(),
            field: "chi".to_string(),
            expected: 7,
            found: 3,
        })
    );

    let text = read("O.pz-legacy.UPF").replace(
        "    2    2             Number of Wavefunctions",
        "    2    3             Number of Wavefunctions",
    );

    assert!(matches!(
        UpfDocument::from_text(&text).unwrap_err(),
        UpfError::Consistency(ConsistencyError::LengthMismatch { expected: 3, found: 2, .. })
    ));
}

#[test]
fn test_huge_projector_count_is_an_error() {
    let text = read("Si.pbe-nc.UPF").replace("number_of_proj=\"2\"", "number_of_proj=\"5000000000\"");

    assert!(matches!(
        UpfDocument::from_text(&text).unwrap_err(),
        UpfError::Schema(SchemaError::InvalidValue { ref field, .. }) if field == "number_of_proj"
    ));

    let text = read("O.pz-legacy.UPF").replace(
        "    2    2             Number of Wavefunctions",
        "    2    5000000000    Number of Wavefunctions",
    );

    assert!(matches!(
        UpfDocument::from_text(&text).unwrap_err(),
        UpfError::Consistency(ConsistencyError::LengthMismatch { expected: 5_000_000_000, found: 2, .. })
    ));
}

#[test]
fn test_angle_bracket_inside_attribute() {
    let text = read("Si.pbe-nc.UPF").replace("comment=\"\"", "comment=\"r > 0\"");
    let doc = UpfDocument::from_text(&text).unwrap();

    assert_eq!(doc.get_str("header", "comment").unwrap(), "r > 0");
    assert_eq!(UpfDocument::from_text(&doc.to_text()).unwrap(), doc);
}
