//! End-to-end validation over CSV files: header errors, structural row
//! errors, and the flattened report shape, all in stream order.

mod common;

use tabular_validate::detect::{Detector, Layout};
use tabular_validate::errors::flatten_errors;
use tabular_validate::field::{Field, FieldType};
use tabular_validate::schema::Schema;

use common::{TestWorkspace, open_csv, open_rows};

fn four_field_schema() -> Schema {
    let mut schema = Schema::default();
    schema.add_field(Field::new("id", FieldType::Integer));
    schema.add_field(Field::new("name", FieldType::String));
    schema.add_field(Field::new("field3", FieldType::String));
    schema.add_field(Field::new("name2", FieldType::String));
    schema
}

#[test]
fn header_and_row_errors_come_out_in_stream_order() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "messy.csv",
        "id,name,,name\n\
         1,english,a,b\n\
         2,german\n\
         3,french\n\
         ,,,\n\
         5,five,a,b,extra\n",
    );

    let mut stream = open_csv(&input, four_field_schema());
    let errors = stream.collect_errors().expect("stream to the end");
    let flat = flatten_errors(
        &errors,
        &["rowNumber", "fieldNumber", "code"],
    );

    let expected: Vec<Vec<Option<String>>> = vec![
        vec![None, Some("3".into()), Some("blank-label".into())],
        vec![None, Some("4".into()), Some("duplicate-label".into())],
        vec![Some("2".into()), Some("3".into()), Some("missing-cell".into())],
        vec![Some("2".into()), Some("4".into()), Some("missing-cell".into())],
        vec![Some("3".into()), Some("3".into()), Some("missing-cell".into())],
        vec![Some("3".into()), Some("4".into()), Some("missing-cell".into())],
        vec![Some("4".into()), None, Some("blank-row".into())],
        vec![Some("5".into()), Some("5".into()), Some("extra-cell".into())],
    ];
    assert_eq!(flat, expected);
    assert_eq!(stream.rows_processed(), 5);
}

#[test]
fn duplicate_label_note_names_the_earlier_position() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("dup.csv", "id,name,,name\n1,english,a,b\n");

    let stream = open_csv(&input, four_field_schema());
    let header = stream.header();
    assert!(!header.valid());
    let duplicate = header
        .errors()
        .iter()
        .find(|error| error.code() == "duplicate-label")
        .expect("duplicate label reported");
    assert_eq!(duplicate.note(), Some("at position \"2\""));
}

#[test]
fn error_collection_is_idempotent_per_row() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("typed.csv", "id,name\nabc,english\n2,german\n");

    let mut schema = Schema::default();
    schema.add_field(Field::new("id", FieldType::Integer));
    schema.add_field(Field::new("name", FieldType::String));

    let mut stream = open_csv(&input, schema);
    let mut rows = stream.read_rows().expect("rows");
    for row in &mut rows {
        let first = row.errors().to_vec();
        let second = row.errors().to_vec();
        assert_eq!(first, second);
    }
    assert_eq!(rows[0].errors()[0].code(), "type-error");
    assert!(rows[1].valid());
}

#[test]
fn header_case_policy_applies_to_label_matching() {
    let mut schema = Schema::default();
    schema.add_field(Field::new("id", FieldType::Integer));
    let detector = Detector {
        schema: Some(schema),
        ..Detector::default()
    };

    let stream = open_rows(&[&["ID"], &["1"]], &detector, Layout::default());
    assert_eq!(stream.header().errors()[0].code(), "incorrect-label");

    let relaxed = Layout {
        header_case: false,
        ..Layout::default()
    };
    let stream = open_rows(&[&["ID"], &["1"]], &detector, relaxed);
    assert!(stream.header().valid());
}

#[test]
fn constraint_errors_name_the_constraint_and_its_literal() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("bounds.csv", "age\n15\n42\n");

    let mut schema = Schema::default();
    let mut age = Field::new("age", FieldType::Integer);
    age.constraints.minimum = Some("18".to_string());
    schema.add_field(age);

    let mut stream = open_csv(&input, schema);
    let mut rows = stream.read_rows().expect("rows");
    let errors = rows[0].errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), "constraint-error");
    assert_eq!(errors[0].note(), Some("constraint \"minimum\" is \"18\""));
    assert!(rows[1].valid());
}

#[test]
fn inferred_schema_validates_the_tail_of_the_file() {
    let workspace = TestWorkspace::new();
    let mut body = String::from("id,score\n");
    for number in 1..=150 {
        body.push_str(&format!("{number},{number}.5\n"));
    }
    body.push_str("oops,1.5\n");
    let input = workspace.write("long.csv", &body);

    let source = tabular_validate::sources::CsvSource::open(&input, None, None).expect("open");
    let mut stream = tabular_validate::stream::TableStream::open(
        Box::new(source),
        &Detector::default(),
        Layout::default(),
        tabular_validate::stream::StreamOptions::default(),
    )
    .expect("open stream");

    assert_eq!(
        stream.schema().fields[0].field_type,
        FieldType::Integer
    );
    let mut rows = stream.read_rows().expect("rows");
    assert_eq!(rows.len(), 151);
    // The bad row lives past the sample window and is still caught.
    assert_eq!(rows[150].errors()[0].code(), "type-error");
    assert_eq!(rows[150].row_position(), 152);
}
