//! Typed backend calls on top of a [`Gateway`] and the [`SessionManager`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::SessionManager;
use crate::error::{PanError, Result};
use crate::gateway::{ApiHost, ApiRequest, Gateway};
use crate::models::{
    AccountInfo, CreateShareOptions, CreatedShare, DriveEntry, ListResponse, MyShare, PageMetadata,
    ShareEntry, ShareReference, ShareToken,
};

/// Share error codes meaning the extraction code is missing or wrong.
const SHARE_PASSCODE_CODES: &[i64] = &[41007, 41008];

/// Share error codes meaning the link no longer resolves.
const SHARE_EXPIRED_CODES: &[i64] = &[41004, 41006, 41010, 41011, 41012];

/// Typed access to the backend endpoints the transfer pipeline and share management use.
#[derive(Clone)]
pub struct PanApi {
    gateway: Arc<dyn Gateway>,
    session: Arc<SessionManager>,
    page_size: u32,
}

impl PanApi {
    pub fn new(gateway: Arc<dyn Gateway>, session: Arc<SessionManager>, page_size: u32) -> Self {
        Self {
            gateway,
            session,
            page_size: page_size.max(1),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Execute a request, attaching the session for authenticated ones. A rejected session is
    /// invalidated so the next call re-authenticates; this call still fails.
    pub async fn call(&self, request: ApiRequest) -> Result<Value> {
        if !request.authenticated {
            return self.gateway.execute(&request, None).await;
        }

        let session = self.session.ensure_session().await?;
        if !session.valid {
            return Err(PanError::Auth("session has been invalidated".into()));
        }
        match self.gateway.execute(&request, Some(&session.cookies)).await {
            Err(PanError::Auth(message)) => {
                self.session.invalidate(&session).await;
                Err(PanError::Auth(message))
            }
            other => other,
        }
    }

    /// Fetch the access token and title of a share.
    pub async fn share_token(&self, share: &ShareReference) -> Result<ShareToken> {
        let request = ApiRequest::post(
            ApiHost::Share,
            "share/sharepage/token",
            json!({
                "pwd_id": share.share_id,
                "passcode": share.password.clone().unwrap_or_default(),
            }),
        )
        .unauthenticated();

        let value = self
            .call(request)
            .await
            .map_err(|e| classify_share_error(share, e))?;
        let token: ShareToken = data_of(&value, "share token")?;
        if token.stoken.is_empty() {
            return Err(PanError::ShareAuth(format!(
                "{}: backend issued no access token",
                share.raw_url
            )));
        }
        Ok(token)
    }

    /// List every entry of a shared folder (`"0"` is the share root).
    pub async fn share_entries(
        &self,
        share: &ShareReference,
        stoken: &str,
        pdir_fid: &str,
    ) -> Result<Vec<ShareEntry>> {
        let mut entries = Vec::new();
        let mut page = 1u32;

        loop {
            let request = ApiRequest::get(ApiHost::Share, "share/sharepage/detail")
                .query("pwd_id", &share.share_id)
                .query("stoken", stoken)
                .query("pdir_fid", pdir_fid)
                .query("_page", page)
                .query("_size", self.page_size)
                .query("_fetch_total", 1)
                .query("_sort", "file_type:asc,file_name:asc")
                .unauthenticated();

            let value = self
                .call(request)
                .await
                .map_err(|e| classify_share_error(share, e))?;
            let batch: ListResponse<ShareEntry> = data_of(&value, "share detail")?;
            let fetched = batch.list.len();
            entries.extend(batch.list);

            if is_last_page(&value, fetched, entries.len(), self.page_size) {
                break;
            }
            page += 1;
        }

        debug!(share_id = %share.share_id, pdir_fid, count = entries.len(), "listed share entries");
        Ok(entries)
    }

    /// Submit a transfer of `entries` into `target_folder_id`; returns the backend task id.
    pub async fn save_share(
        &self,
        share: &ShareReference,
        stoken: &str,
        entries: &[ShareEntry],
        target_folder_id: &str,
    ) -> Result<String> {
        let fids: Vec<&str> = entries.iter().map(|e| e.fid.as_str()).collect();
        let tokens: Vec<&str> = entries.iter().map(|e| e.share_fid_token.as_str()).collect();
        let request = ApiRequest::post(
            ApiHost::Share,
            "share/sharepage/save",
            json!({
                "fid_list": fids,
                "fid_token_list": tokens,
                "to_pdir_fid": target_folder_id,
                "pwd_id": share.share_id,
                "stoken": stoken,
                "pdir_fid": "0",
                "scene": "link",
            }),
        );

        let value = self
            .call(request)
            .await
            .map_err(|e| classify_share_error(share, e))?;
        value
            .pointer("/data/task_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PanError::UnexpectedResponse("save response carries no task_id".into()))
    }

    /// Raw task status response; callers validate its shape.
    pub async fn task_status(&self, task_id: &str, retry_index: u32) -> Result<Value> {
        let request = ApiRequest::get(ApiHost::Drive, "task")
            .query("task_id", task_id)
            .query("retry_index", retry_index);
        self.call(request).await
    }

    /// List every entry of a folder in the user's storage.
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveEntry>> {
        let mut entries = Vec::new();
        let mut page = 1u32;

        loop {
            let request = ApiRequest::get(ApiHost::Drive, "file/sort")
                .query("pdir_fid", folder_id)
                .query("_page", page)
                .query("_size", self.page_size)
                .query("_fetch_total", 1)
                .query("_sort", "file_type:asc,file_name:asc");

            let value = self.call(request).await?;
            let batch: ListResponse<DriveEntry> = data_of(&value, "folder listing")?;
            let fetched = batch.list.len();
            entries.extend(batch.list);

            if is_last_page(&value, fetched, entries.len(), self.page_size) {
                break;
            }
            page += 1;
        }

        Ok(entries)
    }

    /// Create a folder and return its id.
    pub async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let request = ApiRequest::post(
            ApiHost::Drive,
            "file",
            json!({
                "pdir_fid": parent_id,
                "file_name": name,
                "dir_init_lock": false,
                "dir_path": "",
            }),
        );

        let value = self.call(request).await?;
        value
            .pointer("/data/fid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                PanError::UnexpectedResponse("folder creation response carries no fid".into())
            })
    }

    /// Move entries to the recycle bin.
    pub async fn delete_entries(&self, fids: &[String]) -> Result<()> {
        let request = ApiRequest::post(
            ApiHost::Drive,
            "file/delete",
            json!({
                "action_type": 2,
                "filelist": fids,
                "exclude_fids": [],
            }),
        );
        self.call(request).await?;
        Ok(())
    }

    /// Share files from the user's storage.
    pub async fn create_share(
        &self,
        fids: &[String],
        options: &CreateShareOptions,
    ) -> Result<CreatedShare> {
        let expired_type = u8::from(options.expire_days > 0);
        let expire_secs = u64::from(options.expire_days) * 24 * 3600;
        let request = ApiRequest::post(
            ApiHost::Drive,
            "share",
            json!({
                "fid_list": fids,
                "title": "",
                "url_type": 1,
                "expired_type": expired_type,
                "expired_at": expire_secs,
                "passcode": options.passcode.as_deref().unwrap_or(""),
                "download_limit_count": options.download_limit,
            }),
        );

        let value = self.call(request).await?;
        let created: CreatedShare = data_of(&value, "share creation")?;
        if created.task_id.is_none() && created.share_id.is_none() {
            return Err(PanError::UnexpectedResponse(
                "share creation response carries neither task_id nor share_id".into(),
            ));
        }
        debug!(files = fids.len(), share_id = ?created.share_id, "created share");
        Ok(created)
    }

    /// Every share the user owns, newest first.
    pub async fn my_shares(&self) -> Result<Vec<MyShare>> {
        let mut shares = Vec::new();
        let mut page = 1u32;

        loop {
            let request = ApiRequest::get(ApiHost::Drive, "share")
                .query("_page", page)
                .query("_size", self.page_size)
                .query("_fetch_total", 1)
                .query("_sort", "created_at:desc");

            let value = self.call(request).await?;
            let batch: ListResponse<MyShare> = data_of(&value, "share listing")?;
            let fetched = batch.list.len();
            shares.extend(batch.list);

            if is_last_page(&value, fetched, shares.len(), self.page_size) {
                break;
            }
            page += 1;
        }

        Ok(shares)
    }

    pub async fn delete_share(&self, share_id: &str) -> Result<()> {
        let request = ApiRequest::post(ApiHost::Drive, "share/delete", json!({"share_id": share_id}));
        self.call(request).await?;
        Ok(())
    }

    /// Account details; doubles as a check that the session is accepted.
    pub async fn account_info(&self) -> Result<AccountInfo> {
        let request = ApiRequest::get(ApiHost::Account, "account/info");
        let value = self.call(request).await?;
        if value.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(PanError::Auth("account endpoint rejected the session".into()));
        }
        data_of(&value, "account info")
    }
}

/// Deserialize the `data` member of a response envelope.
fn data_of<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T> {
    let data = value
        .get("data")
        .cloned()
        .ok_or_else(|| PanError::UnexpectedResponse(format!("{} response has no data", what)))?;
    serde_json::from_value(data)
        .map_err(|e| PanError::UnexpectedResponse(format!("malformed {} response: {}", what, e)))
}

fn is_last_page(value: &Value, fetched: usize, collected: usize, page_size: u32) -> bool {
    let total = value
        .get("metadata")
        .cloned()
        .and_then(|m| serde_json::from_value::<PageMetadata>(m).ok())
        .and_then(|m| m.total);
    match total {
        Some(total) => collected as u64 >= total || fetched == 0,
        None => fetched < page_size as usize,
    }
}

/// Map share endpoint failures onto the share error taxonomy.
fn classify_share_error(share: &ShareReference, err: PanError) -> PanError {
    let PanError::Remote { code, message } = err else {
        return err;
    };

    let lowered = message.to_lowercase();
    let context = format!("{} ({}: {})", share.raw_url, code, message);
    if SHARE_PASSCODE_CODES.contains(&code)
        || message.contains("提取码")
        || lowered.contains("passcode")
    {
        PanError::ShareAuth(context)
    } else if SHARE_EXPIRED_CODES.contains(&code)
        || ["失效", "过期", "取消", "不存在"]
            .iter()
            .any(|k| message.contains(k))
        || ["expired", "cancel", "not found", "not exist"]
            .iter()
            .any(|k| lowered.contains(k))
    {
        PanError::ShareExpired(context)
    } else {
        PanError::Remote { code, message }
    }
}
