//! Property tests: cross-row uniqueness bookkeeping and cell value
//! round-trips through the reader/writer pair.

mod common;

use proptest::prelude::*;

use tabular_validate::detect::{Detector, Layout};
use tabular_validate::field::{Field, FieldType};
use tabular_validate::schema::Schema;

use common::open_rows;

fn unique_id_detector() -> Detector {
    let mut schema = Schema::default();
    let mut id = Field::new("id", FieldType::Integer);
    id.constraints.unique = Some(true);
    schema.add_field(id);
    Detector {
        schema: Some(schema),
        ..Detector::default()
    }
}

proptest! {
    #[test]
    fn only_repeat_values_are_flagged_as_unique_errors(
        values in proptest::collection::vec(0u8..5, 1..20)
    ) {
        let cells: Vec<String> = values.iter().map(u8::to_string).collect();
        let mut rows: Vec<&[&str]> = vec![&["id"]];
        let cell_refs: Vec<[&str; 1]> = cells.iter().map(|cell| [cell.as_str()]).collect();
        for cell in &cell_refs {
            rows.push(cell);
        }

        let mut stream = open_rows(&rows, &unique_id_detector(), Layout::default());
        let mut streamed = stream.read_rows().expect("rows");
        prop_assert_eq!(streamed.len(), values.len());
        for (index, row) in streamed.iter_mut().enumerate() {
            let expected_repeat = values[..index].contains(&values[index]);
            let flagged = row
                .errors()
                .iter()
                .any(|error| error.code() == "unique-error");
            prop_assert_eq!(flagged, expected_repeat, "row {}", index + 1);
        }
    }

    #[test]
    fn integer_cells_round_trip_through_reader_and_writer(value in any::<i64>()) {
        let field = Field::new("n", FieldType::Integer);
        let reader = field.compile_reader(&[""]).expect("reader");
        let writer = field.compile_writer(&[""]);

        let raw = value.to_string();
        let (cast, notes) = reader.read(&raw);
        prop_assert!(notes.is_empty());
        let cast = cast.expect("integer value");
        prop_assert_eq!(writer.write(Some(&cast), false), raw);
    }

    #[test]
    fn date_cells_round_trip_in_canonical_form(
        year in 1900i32..2100,
        month in 1u32..=12,
        day in 1u32..=28,
    ) {
        let field = Field::new("d", FieldType::Date);
        let reader = field.compile_reader(&[""]).expect("reader");
        let writer = field.compile_writer(&[""]);

        let raw = format!("{year:04}-{month:02}-{day:02}");
        let (cast, notes) = reader.read(&raw);
        prop_assert!(notes.is_empty());
        let cast = cast.expect("date value");
        prop_assert_eq!(writer.write(Some(&cast), false), raw);
    }
}
