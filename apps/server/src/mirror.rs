//! Spreadsheet mirror — a best-effort, non-authoritative replica of the
//! booking ledger the operator reads in a browser.
//!
//! Every call site treats this as advisory: write failures are logged and
//! swallowed, and the confirmed-dates read only narrows availability (a
//! mirror outage degrades to local-only mode, never blocks booking).

use chrono::NaiveDate;

use crate::error::CoreError;

/// Status labels as they appear in the operator's spreadsheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorStatus {
    AwaitingDeposit,
    DepositReceived,
    FullyPaid,
    Completed,
}

impl MirrorStatus {
    pub fn label(self) -> &'static str {
        match self {
            MirrorStatus::AwaitingDeposit => "Предоплата ожидается",
            MirrorStatus::DepositReceived => "Предоплата получена",
            MirrorStatus::FullyPaid => "Полная оплата",
            MirrorStatus::Completed => "Проект завершен",
        }
    }
}

/// One appended spreadsheet row.
#[derive(Debug, Clone)]
pub struct MirrorRow {
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: String,
    pub booking_date: NaiveDate,
    pub payment_id: String,
    pub deposit_amount: i64,
    pub final_amount: i64,
}

pub enum Mirror {
    Sheets(SheetsMirror),
    /// No spreadsheet configured — local store only.
    Disabled,
    #[cfg(test)]
    Memory(memory::MemoryMirror),
}

impl Mirror {
    pub async fn append_booking_row(&self, row: &MirrorRow) -> Result<(), CoreError> {
        match self {
            Mirror::Sheets(s) => s.append_booking_row(row).await,
            Mirror::Disabled => Ok(()),
            #[cfg(test)]
            Mirror::Memory(m) => m.append_booking_row(row),
        }
    }

    pub async fn update_status_cell(
        &self,
        user_id: i64,
        date: NaiveDate,
        status: MirrorStatus,
    ) -> Result<(), CoreError> {
        match self {
            Mirror::Sheets(s) => s.update_status_cell(user_id, date, status).await,
            Mirror::Disabled => Ok(()),
            #[cfg(test)]
            Mirror::Memory(m) => m.update_status_cell(user_id, date, status),
        }
    }

    /// Dates the spreadsheet believes are confirmed. Used as a defensive
    /// double-check against mirror drift when projecting availability.
    pub async fn list_confirmed_dates(&self) -> Result<Vec<NaiveDate>, CoreError> {
        match self {
            Mirror::Sheets(s) => s.list_confirmed_dates().await,
            Mirror::Disabled => Ok(Vec::new()),
            #[cfg(test)]
            Mirror::Memory(m) => m.list_confirmed_dates(),
        }
    }
}

// ── Google Sheets backend ──

/// Thin client over the Sheets values API. The sheet layout matches the
/// operator's existing table: one row per booking, status in column G.
pub struct SheetsMirror {
    http: reqwest::Client,
    spreadsheet_id: String,
    access_token: String,
}

impl SheetsMirror {
    pub fn new(spreadsheet_id: String, access_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            spreadsheet_id,
            access_token,
        }
    }

    fn values_url(&self, suffix: &str) -> String {
        format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}",
            self.spreadsheet_id, suffix
        )
    }

    async fn append_booking_row(&self, row: &MirrorRow) -> Result<(), CoreError> {
        let values = serde_json::json!({
            "values": [[
                crate::calendar::msk_now().format("%d.%m.%Y %H:%M").to_string(),
                row.user_id.to_string(),
                row.username.clone().unwrap_or_default(),
                row.display_name,
                row.booking_date.format("%d.%m.%Y").to_string(),
                MirrorStatus::AwaitingDeposit.label(),
                row.payment_id,
                row.deposit_amount,
                row.final_amount,
            ]]
        });

        let resp = self
            .http
            .post(self.values_url("A1:append?valueInputOption=USER_ENTERED"))
            .bearer_auth(&self.access_token)
            .json(&values)
            .send()
            .await
            .map_err(|e| CoreError::MirrorUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::MirrorUnavailable(format!(
                "append returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn update_status_cell(
        &self,
        user_id: i64,
        date: NaiveDate,
        status: MirrorStatus,
    ) -> Result<(), CoreError> {
        let rows = self.fetch_rows().await?;
        let user = user_id.to_string();
        let date_label = date.format("%d.%m.%Y").to_string();

        // Row 1 holds headers; data starts at row 2.
        let row_index = rows
            .iter()
            .position(|r| {
                r.get(1).map(String::as_str) == Some(user.as_str())
                    && r.get(4).map(String::as_str) == Some(date_label.as_str())
            })
            .map(|i| i + 2)
            .ok_or_else(|| {
                CoreError::MirrorUnavailable(format!(
                    "no mirror row for user {} on {}",
                    user_id, date_label
                ))
            })?;

        let body = serde_json::json!({ "values": [[status.label()]] });
        let resp = self
            .http
            .put(self.values_url(&format!("F{row_index}?valueInputOption=USER_ENTERED")))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::MirrorUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::MirrorUnavailable(format!(
                "update returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn list_confirmed_dates(&self) -> Result<Vec<NaiveDate>, CoreError> {
        let rows = self.fetch_rows().await?;
        let confirmed = [
            MirrorStatus::DepositReceived.label(),
            MirrorStatus::FullyPaid.label(),
        ];

        let mut dates = Vec::new();
        for row in rows {
            let status = row.get(5).map(String::as_str).unwrap_or("");
            if !confirmed.contains(&status) {
                continue;
            }
            let Some(raw) = row.get(4) else { continue };
            match NaiveDate::parse_from_str(raw.trim(), "%d.%m.%Y") {
                Ok(d) => dates.push(d),
                Err(_) => tracing::warn!("Mirror row has malformed date: {:?}", raw),
            }
        }
        Ok(dates)
    }

    /// All data rows (header excluded).
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, CoreError> {
        let resp = self
            .http
            .get(self.values_url("A2:I"))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| CoreError::MirrorUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::MirrorUnavailable(format!(
                "read returned {}",
                resp.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct ValueRange {
            #[serde(default)]
            values: Vec<Vec<String>>,
        }

        let range: ValueRange = resp
            .json()
            .await
            .map_err(|e| CoreError::MirrorUnavailable(e.to_string()))?;
        Ok(range.values)
    }
}

// ── In-memory backend (tests) ──
