use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{InvoiceError, Result};
use crate::models::{Client, ClientPatch, NewClient};

const SELECT_CLIENT: &str = "SELECT id, name, address, phone, email FROM clients";

fn client_from_row(r: &Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: r.get(0)?,
        name: r.get(1)?,
        address: r.get(2)?,
        phone: r.get(3)?,
        email: r.get(4)?,
    })
}

pub fn list_clients(conn: &Connection) -> Result<Vec<Client>> {
    let mut stmt = conn.prepare(&format!("{SELECT_CLIENT} ORDER BY name ASC, id ASC"))?;
    let rows = stmt.query_map([], client_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn find_client(conn: &Connection, id: i64) -> Result<Option<Client>> {
    Ok(conn
        .query_row(&format!("{SELECT_CLIENT} WHERE id = ?1"), params![id], client_from_row)
        .optional()?)
}

pub fn get_client(conn: &Connection, id: i64) -> Result<Client> {
    find_client(conn, id)?.ok_or_else(|| InvoiceError::client_not_found(id))
}

pub fn create_client(conn: &Connection, input: NewClient) -> Result<Client> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(InvoiceError::validation("name required"));
    }
    conn.execute(
        "INSERT INTO clients (name, address, phone, email) VALUES (?1, ?2, ?3, ?4)",
        params![name, input.address, input.phone, input.email],
    )?;
    get_client(conn, conn.last_insert_rowid())
}

pub fn update_client(conn: &Connection, id: i64, patch: ClientPatch) -> Result<Client> {
    let existing = get_client(conn, id)?;

    let name = match patch.name {
        Some(n) if n.trim().is_empty() => return Err(InvoiceError::validation("name required")),
        Some(n) => n.trim().to_string(),
        None => existing.name,
    };

    conn.execute(
        "UPDATE clients SET name = ?2, address = ?3, phone = ?4, email = ?5 WHERE id = ?1",
        params![
            id,
            name,
            patch.address.unwrap_or(existing.address),
            patch.phone.unwrap_or(existing.phone),
            patch.email.unwrap_or(existing.email),
        ],
    )?;
    get_client(conn, id)
}

/// Hard delete. Invoices that referenced the client keep `client_id = NULL`.
pub fn delete_client(conn: &Connection, id: i64) -> Result<()> {
    let affected = conn.execute("DELETE FROM clients WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(InvoiceError::client_not_found(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn new_client(name: &str) -> NewClient {
        NewClient {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            ..Default::default()
        }
    }

    #[test]
    fn create_and_list_sorted_by_name() {
        let conn = db::open_in_memory().unwrap();
        create_client(&conn, new_client("Zeta")).unwrap();
        let alpha = create_client(&conn, new_client("Alpha")).unwrap();
        assert_eq!(alpha.email, "alpha@example.com");

        let names: Vec<String> = list_clients(&conn).unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
    }

    #[test]
    fn blank_name_is_rejected() {
        let conn = db::open_in_memory().unwrap();
        let err = create_client(&conn, new_client("   ")).unwrap_err();
        assert!(matches!(err, InvoiceError::Validation(_)));
        assert!(list_clients(&conn).unwrap().is_empty());
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let conn = db::open_in_memory().unwrap();
        let c = create_client(&conn, new_client("Acme")).unwrap();
        let updated = update_client(
            &conn,
            c.id,
            ClientPatch {
                phone: Some("+1 555".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.name, "Acme");
        assert_eq!(updated.email, "acme@example.com");
        assert_eq!(updated.phone, "+1 555");
    }

    #[test]
    fn missing_client_is_not_found() {
        let conn = db::open_in_memory().unwrap();
        assert!(matches!(
            get_client(&conn, 99),
            Err(InvoiceError::NotFound { entity: "client", id: 99 })
        ));
        assert!(matches!(
            delete_client(&conn, 99),
            Err(InvoiceError::NotFound { .. })
        ));
        assert!(matches!(
            update_client(&conn, 99, ClientPatch::default()),
            Err(InvoiceError::NotFound { .. })
        ));
    }
}
