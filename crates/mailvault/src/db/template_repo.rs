//! Template repository — CRUD for the `templates` table.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// A raw template row from the database.
#[derive(Debug, Clone)]
pub struct TemplateRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub variables: Vec<String>,
    pub category: Option<String>,
    pub use_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for creating a template.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub variables: Vec<String>,
    pub category: Option<String>,
}

const COLUMNS: &str =
    "id, user_id, name, subject, body, variables, category, use_count, created_at, updated_at";

fn row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<(TemplateRow, String)> {
    let variables_json: String = row.get(5)?;
    Ok((
        TemplateRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            subject: row.get(3)?,
            body: row.get(4)?,
            variables: Vec::new(),
            category: row.get(6)?,
            use_count: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        },
        variables_json,
    ))
}

fn finish_row((mut tpl, json): (TemplateRow, String)) -> Result<TemplateRow, DatabaseError> {
    tpl.variables = serde_json::from_str(&json).map_err(|e| DatabaseError::CorruptColumn {
        column: "variables",
        reason: e.to_string(),
    })?;
    Ok(tpl)
}

/// Inserts a template. The (user_id, name) pair must be unique.
pub fn insert(db: &Database, new: &NewTemplate) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let variables = serde_json::to_string(&new.variables).unwrap_or_else(|_| "[]".to_string());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO templates
               (id, user_id, name, subject, body, variables, category, use_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
            params![
                new.id,
                new.user_id,
                new.name,
                new.subject,
                new.body,
                variables,
                new.category,
                now,
            ],
        )?;
        Ok(())
    })
}

/// Finds a template by id.
pub fn find(db: &Database, id: &str) -> Result<Option<TemplateRow>, DatabaseError> {
    db.with_conn(|conn| {
        let found = conn
            .query_row(
                &format!("SELECT {} FROM templates WHERE id = ?1", COLUMNS),
                params![id],
                row_from,
            )
            .optional()?;
        found.map(finish_row).transpose()
    })
}

/// Lists a user's templates, alphabetically by name.
pub fn list_for_user(db: &Database, user_id: &str) -> Result<Vec<TemplateRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM templates WHERE user_id = ?1 ORDER BY name",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id], row_from)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(finish_row)
            .collect();
        rows
    })
}

/// Increments the template's use counter.
pub fn bump_use_count(db: &Database, id: &str) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE templates SET use_count = use_count + 1, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    })
}

/// Deletes a template by id.
pub fn delete(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM templates WHERE id = ?1", params![id])?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample(id: &str, name: &str) -> NewTemplate {
        NewTemplate {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: name.to_string(),
            subject: "Following up on {{role}}".to_string(),
            body: "Hi {{name}}, just checking in about {{role}}.".to_string(),
            variables: vec!["name".to_string(), "role".to_string()],
            category: Some("follow-up".to_string()),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample("tp1", "follow-up")).unwrap();

        let found = find(&db, "tp1").unwrap().unwrap();
        assert_eq!(found.name, "follow-up");
        assert_eq!(found.variables, vec!["name", "role"]);
        assert_eq!(found.use_count, 0);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let db = test_db();
        insert(&db, &sample("tp1", "follow-up")).unwrap();
        assert!(insert(&db, &sample("tp2", "follow-up")).is_err());
    }

    #[test]
    fn test_list_ordered_by_name() {
        let db = test_db();
        insert(&db, &sample("tp1", "thanks")).unwrap();
        insert(&db, &sample("tp2", "follow-up")).unwrap();

        let names: Vec<_> = list_for_user(&db, "u1")
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["follow-up", "thanks"]);
        assert!(list_for_user(&db, "other").unwrap().is_empty());
    }

    #[test]
    fn test_bump_use_count() {
        let db = test_db();
        insert(&db, &sample("tp1", "follow-up")).unwrap();
        bump_use_count(&db, "tp1").unwrap();
        bump_use_count(&db, "tp1").unwrap();

        assert_eq!(find(&db, "tp1").unwrap().unwrap().use_count, 2);
    }

    #[test]
    fn test_delete() {
        let db = test_db();
        insert(&db, &sample("tp1", "follow-up")).unwrap();
        delete(&db, "tp1").unwrap();
        assert!(find(&db, "tp1").unwrap().is_none());
    }
}
