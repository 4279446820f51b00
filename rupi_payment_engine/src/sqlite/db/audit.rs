use log::warn;
use sqlx::SqliteConnection;

/// Journal a noteworthy event. Audit writes are best-effort: a failure is logged but never allowed to abort the
/// operation being journaled.
pub async fn write(scope: &str, order_id: Option<&str>, message: &str, conn: &mut SqliteConnection) {
    let result = sqlx::query("INSERT INTO audit_log (scope, order_id, message) VALUES ($1, $2, $3)")
        .bind(scope)
        .bind(order_id)
        .bind(message)
        .execute(conn)
        .await;
    if let Err(e) = result {
        warn!("🧾️ Could not write audit entry [{scope}] {message}: {e}");
    }
}
