//! Transactions repository.

use ceptor_core::{
    CapturedBody, CapturedTransaction, Headers, NewTransaction, RequestRecord, ResponseRecord,
    TransactionFilter, TransactionId, TransactionStatus, TransactionSummary,
};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::error::Result;

const COLUMNS: &str = "id, method, url, \
    request_headers, request_body, request_body_size, request_body_truncated, request_body_binary, \
    response_code, response_message, \
    response_headers, response_body, response_body_size, response_body_truncated, response_body_binary, \
    protocol, tls_version, error, started_at, completed_at";

const SUMMARY_COLUMNS: &str =
    "id, method, url, response_code, error, started_at, completed_at, response_body_size";

/// Repository for captured transactions.
pub struct TransactionRepo;

impl TransactionRepo {
    /// Insert a transaction in the requested state.
    pub fn insert(conn: &Connection, tx: &NewTransaction) -> Result<TransactionId> {
        let body = tx.request.body.as_ref();
        conn.execute(
            "INSERT INTO transactions (method, url, request_headers, request_body,
                request_body_size, request_body_truncated, request_body_binary, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tx.request.method,
                tx.request.url,
                serde_json::to_string(&tx.request.headers)?,
                body.map(|b| b.bytes.as_slice()),
                body.map(|b| size_to_sql(b.declared_size)),
                body.is_some_and(|b| b.is_truncated),
                body.is_some_and(|b| b.is_binary),
                tx.started_at.timestamp_millis(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Record the response unless the transaction already has one (or an
    /// error). Returns whether a row was updated.
    pub fn complete(
        conn: &Connection,
        id: TransactionId,
        response: &ResponseRecord,
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let body = response.body.as_ref();
        let updated = conn.execute(
            "UPDATE transactions SET
                response_code = ?2, response_message = ?3, response_headers = ?4,
                response_body = ?5, response_body_size = ?6,
                response_body_truncated = ?7, response_body_binary = ?8,
                protocol = ?9, tls_version = ?10, error = ?11, completed_at = ?12
             WHERE id = ?1 AND response_code IS NULL AND error IS NULL",
            params![
                id,
                response.code,
                response.message,
                serde_json::to_string(&response.headers)?,
                body.map(|b| b.bytes.as_slice()),
                body.map(|b| size_to_sql(b.declared_size)),
                body.is_some_and(|b| b.is_truncated),
                body.is_some_and(|b| b.is_binary),
                response.protocol,
                response.tls_version,
                response.error,
                completed_at.timestamp_millis(),
            ],
        )?;

        Ok(updated > 0)
    }

    /// Check whether a transaction exists.
    pub fn exists(conn: &Connection, id: TransactionId) -> Result<bool> {
        let found = conn
            .query_row("SELECT 1 FROM transactions WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Get a transaction by ID.
    pub fn get_by_id(conn: &Connection, id: TransactionId) -> Result<Option<CapturedTransaction>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE id = ?1",
            COLUMNS
        ))?;

        Ok(stmt.query_row([id], row_to_transaction).optional()?)
    }

    /// List summaries matching a filter, newest first.
    pub fn list(
        conn: &Connection,
        filter: &TransactionFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionSummary>> {
        let (where_clause, mut values) = filter_clause(filter);
        values.push(Value::Integer(usize_to_sql(limit)));
        values.push(Value::Integer(usize_to_sql(offset)));

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions{} ORDER BY id DESC LIMIT ? OFFSET ?",
            SUMMARY_COLUMNS, where_clause
        ))?;

        let summaries = stmt
            .query_map(params_from_iter(values.iter()), row_to_summary)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(summaries)
    }

    /// Count transactions matching a filter.
    pub fn count(conn: &Connection, filter: &TransactionFilter) -> Result<u64> {
        let (where_clause, values) = filter_clause(filter);
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM transactions{}", where_clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Delete transactions started before a given time.
    pub fn delete_older_than(conn: &Connection, before: DateTime<Utc>) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM transactions WHERE started_at < ?1",
            [before.timestamp_millis()],
        )?;
        Ok(deleted)
    }

    /// Delete every transaction.
    pub fn clear(conn: &Connection) -> Result<usize> {
        Ok(conn.execute("DELETE FROM transactions", [])?)
    }
}

/// WHERE clause (with leading space) and its positional values.
fn filter_clause(filter: &TransactionFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values = Vec::new();

    if let Some(method) = &filter.method {
        clauses.push("UPPER(method) = UPPER(?)");
        values.push(Value::Text(method.clone()));
    }
    if let Some(status) = filter.status {
        clauses.push(match status {
            TransactionStatus::Requested => "(error IS NULL AND response_code IS NULL)",
            TransactionStatus::Complete => "(error IS NULL AND response_code IS NOT NULL)",
            TransactionStatus::Failed => "error IS NOT NULL",
        });
    }
    if let Some(search) = &filter.search {
        clauses.push("instr(LOWER(url), LOWER(?)) > 0");
        values.push(Value::Text(search.clone()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn size_to_sql(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn usize_to_sql(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn status_of(code: Option<u16>, error: Option<&str>) -> TransactionStatus {
    match (error, code) {
        (Some(_), _) => TransactionStatus::Failed,
        (None, None) => TransactionStatus::Requested,
        (None, Some(_)) => TransactionStatus::Complete,
    }
}

fn headers_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Headers> {
    let json: String = row.get(idx)?;
    serde_json::from_str(&json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Reads the four body columns starting at `idx`.
fn body_columns(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<CapturedBody>> {
    let Some(size) = row.get::<_, Option<i64>>(idx + 1)? else {
        return Ok(None);
    };
    Ok(Some(CapturedBody {
        bytes: row.get::<_, Option<Vec<u8>>>(idx)?.unwrap_or_default(),
        declared_size: size.max(0) as u64,
        is_truncated: row.get(idx + 2)?,
        is_binary: row.get(idx + 3)?,
    }))
}

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<CapturedTransaction> {
    Ok(CapturedTransaction {
        id: row.get(0)?,
        request: RequestRecord {
            method: row.get(1)?,
            url: row.get(2)?,
            headers: headers_column(row, 3)?,
            body: body_columns(row, 4)?,
        },
        response: ResponseRecord {
            code: row.get(8)?,
            message: row.get(9)?,
            headers: headers_column(row, 10)?,
            body: body_columns(row, 11)?,
            protocol: row.get(15)?,
            tls_version: row.get(16)?,
            error: row.get(17)?,
        },
        started_at: millis_to_datetime(row.get(18)?),
        completed_at: row.get::<_, Option<i64>>(19)?.map(millis_to_datetime),
    })
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<TransactionSummary> {
    let code: Option<u16> = row.get(3)?;
    let error: Option<String> = row.get(4)?;
    let started_at = millis_to_datetime(row.get(5)?);
    let completed_at = row.get::<_, Option<i64>>(6)?.map(millis_to_datetime);

    Ok(TransactionSummary {
        id: row.get(0)?,
        method: row.get(1)?,
        url: row.get(2)?,
        code,
        status: status_of(code, error.as_deref()),
        started_at,
        duration_ms: completed_at.map(|done| (done - started_at).num_milliseconds()),
        response_size: row
            .get::<_, Option<i64>>(7)?
            .map(|size| size.max(0) as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;
    use chrono::{Duration, TimeZone};

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn new_tx(method: &str, url: &str, started_at: DateTime<Utc>) -> NewTransaction {
        NewTransaction {
            request: RequestRecord {
                method: method.to_string(),
                url: url.to_string(),
                headers: Headers::new().with("Accept", "application/json"),
                body: None,
            },
            started_at,
        }
    }

    fn ok_response(code: u16) -> ResponseRecord {
        ResponseRecord {
            code: Some(code),
            message: Some("OK".to_string()),
            headers: Headers::new()
                .with("Set-Cookie", "a=1")
                .with("Set-Cookie", "b=2"),
            body: Some(CapturedBody {
                bytes: b"{\"ok\":true}".to_vec(),
                declared_size: 11,
                is_truncated: false,
                is_binary: false,
            }),
            protocol: Some("h2".to_string()),
            ..Default::default()
        }
    }

    // ==================== Insert/Get Tests ====================

    #[test]
    fn test_insert_and_get() {
        let conn = setup_db();
        let mut tx = new_tx("POST", "https://api.example.com/login", at(0));
        tx.request.body = Some(CapturedBody {
            bytes: b"user=a".to_vec(),
            declared_size: 300_000,
            is_truncated: true,
            is_binary: false,
        });

        let id = TransactionRepo::insert(&conn, &tx).unwrap();
        let stored = TransactionRepo::get_by_id(&conn, id).unwrap().unwrap();

        assert_eq!(stored.request, tx.request);
        assert_eq!(stored.started_at, at(0));
        assert_eq!(stored.status(), TransactionStatus::Requested);
        assert!(stored.completed_at.is_none());
        assert!(stored.response.body.is_none());
    }

    #[test]
    fn test_empty_body_survives() {
        let conn = setup_db();
        let mut tx = new_tx("POST", "https://example.com/", at(0));
        tx.request.body = Some(CapturedBody::default());

        let id = TransactionRepo::insert(&conn, &tx).unwrap();
        let stored = TransactionRepo::get_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(stored.request.body, Some(CapturedBody::default()));
    }

    #[test]
    fn test_get_missing() {
        let conn = setup_db();
        assert!(TransactionRepo::get_by_id(&conn, 42).unwrap().is_none());
        assert!(!TransactionRepo::exists(&conn, 42).unwrap());
    }

    // ==================== Completion Tests ====================

    #[test]
    fn test_complete_once() {
        let conn = setup_db();
        let id = TransactionRepo::insert(&conn, &new_tx("GET", "https://example.com/", at(0))).unwrap();

        assert!(TransactionRepo::complete(&conn, id, &ok_response(200), at(2)).unwrap());
        assert!(!TransactionRepo::complete(&conn, id, &ok_response(500), at(3)).unwrap());

        let stored = TransactionRepo::get_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(stored.response, ok_response(200));
        assert_eq!(stored.response.headers.get_all("set-cookie").unwrap().len(), 2);
        assert_eq!(stored.duration_ms(), Some(2000));
    }

    #[test]
    fn test_failed_is_terminal() {
        let conn = setup_db();
        let id = TransactionRepo::insert(&conn, &new_tx("GET", "https://example.com/", at(0))).unwrap();
        let failure = ResponseRecord {
            error: Some("connection reset".to_string()),
            ..Default::default()
        };

        assert!(TransactionRepo::complete(&conn, id, &failure, at(1)).unwrap());
        assert!(!TransactionRepo::complete(&conn, id, &ok_response(200), at(2)).unwrap());

        let stored = TransactionRepo::get_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(stored.status(), TransactionStatus::Failed);
        assert!(stored.response.code.is_none());
    }

    // ==================== Listing Tests ====================

    #[test]
    fn test_list_newest_first_with_paging() {
        let conn = setup_db();
        for i in 0..5 {
            TransactionRepo::insert(&conn, &new_tx("GET", &format!("https://example.com/{}", i), at(i)))
                .unwrap();
        }

        let page = TransactionRepo::list(&conn, &TransactionFilter::all(), 2, 1).unwrap();
        let urls: Vec<&str> = page.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/3", "https://example.com/2"]);
    }

    #[test]
    fn test_filters() {
        let conn = setup_db();
        let a = TransactionRepo::insert(&conn, &new_tx("GET", "https://api.example.com/Users", at(0))).unwrap();
        let b = TransactionRepo::insert(&conn, &new_tx("post", "https://api.example.com/login", at(1))).unwrap();
        TransactionRepo::insert(&conn, &new_tx("GET", "https://cdn.example.com/app.js", at(2))).unwrap();
        TransactionRepo::complete(&conn, a, &ok_response(200), at(3)).unwrap();
        let failure = ResponseRecord {
            error: Some("timeout".to_string()),
            ..Default::default()
        };
        TransactionRepo::complete(&conn, b, &failure, at(4)).unwrap();

        let count = |filter: TransactionFilter| TransactionRepo::count(&conn, &filter).unwrap();
        assert_eq!(count(TransactionFilter::all()), 3);
        assert_eq!(count(TransactionFilter::all().with_method("POST")), 1);
        assert_eq!(count(TransactionFilter::all().with_search("API.example")), 2);
        assert_eq!(count(TransactionFilter::all().with_search("users")), 1);
        assert_eq!(count(TransactionFilter::all().with_status(TransactionStatus::Complete)), 1);
        assert_eq!(count(TransactionFilter::all().with_status(TransactionStatus::Failed)), 1);
        assert_eq!(count(TransactionFilter::all().with_status(TransactionStatus::Requested)), 1);
        assert_eq!(
            count(TransactionFilter::all().with_method("GET").with_search("api")),
            1
        );
    }

    #[test]
    fn test_summary_fields() {
        let conn = setup_db();
        let id = TransactionRepo::insert(&conn, &new_tx("GET", "https://example.com/", at(0))).unwrap();
        TransactionRepo::complete(&conn, id, &ok_response(201), at(1)).unwrap();

        let summary = &TransactionRepo::list(&conn, &TransactionFilter::all(), 10, 0).unwrap()[0];
        let stored = TransactionRepo::get_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(*summary, TransactionSummary::from(&stored));
        assert_eq!(summary.response_size, Some(11));
    }

    // ==================== Deletion Tests ====================

    #[test]
    fn test_delete_older_than() {
        let conn = setup_db();
        for i in 0..4 {
            TransactionRepo::insert(&conn, &new_tx("GET", "https://example.com/", at(i * 60))).unwrap();
        }

        let deleted = TransactionRepo::delete_older_than(&conn, at(0) + Duration::seconds(120)).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(TransactionRepo::count(&conn, &TransactionFilter::all()).unwrap(), 2);
        assert_eq!(TransactionRepo::clear(&conn).unwrap(), 2);
    }

    #[test]
    fn test_ids_keep_increasing_after_clear() {
        let conn = setup_db();
        let first = TransactionRepo::insert(&conn, &new_tx("GET", "https://example.com/", at(0))).unwrap();
        TransactionRepo::clear(&conn).unwrap();
        let second = TransactionRepo::insert(&conn, &new_tx("GET", "https://example.com/", at(1))).unwrap();
        assert!(second > first);
    }
}
