use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::AutomationError;
use crate::models::FormTask;

/// Which spreadsheet columns hold the form-field task data.
#[derive(Debug, Clone, Copy)]
pub struct TaskColumns {
    pub question: char,
    pub ordinal: char,
    pub edit: char,
    pub validation: char,
}

/// Maps a spreadsheet column letter to its zero-based index ('A' → 0).
/// Validated before any network traffic happens.
pub fn column_index(letter: char) -> Result<usize, AutomationError> {
    if letter.is_ascii_alphabetic() {
        Ok(letter.to_ascii_uppercase() as usize - 'A' as usize)
    } else {
        Err(AutomationError::configuration(format!(
            "invalid column letter '{letter}'; use single letters like 'A', 'B', ..."
        )))
    }
}

/// Downloads the published spreadsheet. A non-success HTTP status is a
/// `Network` error; there is no retry and no authentication.
pub async fn fetch_csv(url: &str) -> Result<String, AutomationError> {
    info!("Downloading spreadsheet data...");
    let response = reqwest::get(url).await?.error_for_status()?;
    Ok(response.text().await?)
}

/// Parses the sheet into an id → classification map.
///
/// The header row is discarded. Rows too short to cover both configured
/// columns, and rows whose id or classification trims to empty, are dropped
/// without comment. Duplicate ids keep the last value seen. Quoting and
/// embedded commas are handled by the CSV reader; the drop-short-rows
/// policy is kept as-is.
pub fn parse_classification_map(
    text: &str,
    id_column: char,
    classification_column: char,
) -> Result<HashMap<String, String>, AutomationError> {
    let id_idx = column_index(id_column)?;
    let class_idx = column_index(classification_column)?;
    let max_idx = id_idx.max(class_idx);

    let mut mapping = HashMap::new();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                debug!("dropping unreadable spreadsheet record: {e}");
                continue;
            }
        };
        if record.len() <= max_idx {
            continue;
        }
        let id = record.get(id_idx).unwrap_or("").trim();
        let classification = record.get(class_idx).unwrap_or("").trim();
        if id.is_empty() || classification.is_empty() {
            continue;
        }
        mapping.insert(id.to_string(), classification.to_string());
    }

    if mapping.is_empty() {
        return Err(AutomationError::EmptyResult);
    }
    info!("✅ {} O.S. mappings loaded from the spreadsheet", mapping.len());
    Ok(mapping)
}

/// Parses the sheet into the ordered task list of the form-field variant.
/// Same dropping policy as the classification map; a task needs at least a
/// question and an ordinal.
pub fn parse_form_tasks(
    text: &str,
    columns: &TaskColumns,
) -> Result<Vec<FormTask>, AutomationError> {
    let question_idx = column_index(columns.question)?;
    let ordinal_idx = column_index(columns.ordinal)?;
    let edit_idx = column_index(columns.edit)?;
    let validation_idx = column_index(columns.validation)?;
    let max_idx = question_idx
        .max(ordinal_idx)
        .max(edit_idx)
        .max(validation_idx);

    let mut tasks = Vec::new();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                debug!("dropping unreadable spreadsheet record: {e}");
                continue;
            }
        };
        if record.len() <= max_idx {
            continue;
        }
        let task = FormTask {
            question: record.get(question_idx).unwrap_or("").trim().to_string(),
            ordinal: record.get(ordinal_idx).unwrap_or("").trim().to_string(),
            edit_text: record.get(edit_idx).unwrap_or("").trim().to_string(),
            validation_text: record.get(validation_idx).unwrap_or("").trim().to_string(),
        };
        if task.ordinal.is_empty() || task.question.is_empty() {
            continue;
        }
        tasks.push(task);
    }

    if tasks.is_empty() {
        return Err(AutomationError::EmptyResult);
    }
    info!("✅ {} tasks loaded from the spreadsheet", tasks.len());
    Ok(tasks)
}

/// Fetch + parse in one step. Column letters are validated up front so a
/// bad configuration never reaches the network.
pub async fn load_classification_map(
    url: &str,
    id_column: char,
    classification_column: char,
) -> Result<HashMap<String, String>, AutomationError> {
    column_index(id_column)?;
    column_index(classification_column)?;
    let text = fetch_csv(url).await?;
    parse_classification_map(&text, id_column, classification_column)
}

pub async fn load_form_tasks(
    url: &str,
    columns: &TaskColumns,
) -> Result<Vec<FormTask>, AutomationError> {
    column_index(columns.question)?;
    column_index(columns.ordinal)?;
    column_index(columns.edit)?;
    column_index(columns.validation)?;
    let text = fetch_csv(url).await?;
    parse_form_tasks(&text, columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_map_to_zero_based_indices() {
        assert_eq!(column_index('A').unwrap(), 0);
        assert_eq!(column_index('b').unwrap(), 1);
        assert_eq!(column_index('F').unwrap(), 5);
    }

    #[test]
    fn invalid_column_letters_fail_before_anything_else() {
        assert!(matches!(
            column_index('1'),
            Err(AutomationError::Configuration(_))
        ));
        assert!(matches!(
            column_index('?'),
            Err(AutomationError::Configuration(_))
        ));
    }

    #[test]
    fn classification_map_round_trip() {
        let csv = "id,class\n1,Corretiva\n2,Melhoria\n";
        let mapping = parse_classification_map(csv, 'A', 'B').unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.get("1").map(String::as_str), Some("Corretiva"));
        assert_eq!(mapping.get("2").map(String::as_str), Some("Melhoria"));
    }

    #[test]
    fn short_or_empty_rows_are_dropped_silently() {
        let csv = "id,class\n1,Corretiva\n3,\n4\n,Melhoria\n";
        let mapping = parse_classification_map(csv, 'A', 'B').unwrap();
        assert_eq!(mapping.len(), 1);
        assert!(mapping.contains_key("1"));
    }

    #[test]
    fn quoted_fields_are_unwrapped() {
        let csv = "id,class\n\"1\",\"Corretiva Planejada\"\n";
        let mapping = parse_classification_map(csv, 'A', 'B').unwrap();
        assert_eq!(
            mapping.get("1").map(String::as_str),
            Some("Corretiva Planejada")
        );
    }

    #[test]
    fn duplicate_ids_keep_the_last_value() {
        let csv = "id,class\n1,Corretiva\n1,Melhoria\n";
        let mapping = parse_classification_map(csv, 'A', 'B').unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("1").map(String::as_str), Some("Melhoria"));
    }

    #[test]
    fn a_sheet_with_no_usable_rows_is_an_error() {
        let csv = "id,class\n,\n";
        assert!(matches!(
            parse_classification_map(csv, 'A', 'B'),
            Err(AutomationError::EmptyResult)
        ));
    }

    #[test]
    fn other_columns_can_be_selected() {
        let csv = "a,b,c,d\nx,y,10,Corretiva\n";
        let mapping = parse_classification_map(csv, 'C', 'D').unwrap();
        assert_eq!(mapping.get("10").map(String::as_str), Some("Corretiva"));
    }

    #[test]
    fn form_tasks_keep_supplemental_fields_and_order() {
        let columns = TaskColumns {
            question: 'C',
            ordinal: 'D',
            edit: 'E',
            validation: 'F',
        };
        let csv = "a,b,pergunta,ordem,editar,validacao\n\
                   x,y,Qr-code do local,2,Texto novo,Resposta\n\
                   x,y,Título,1,Outro texto,\n\
                   x,y,,3,desc,resp\n";
        let tasks = parse_form_tasks(csv, &columns).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].ordinal, "2");
        assert_eq!(tasks[0].edit_text, "Texto novo");
        assert_eq!(tasks[0].validation_text, "Resposta");
        assert_eq!(tasks[1].question, "Título");
        // The row with no question text was dropped.
    }
}
