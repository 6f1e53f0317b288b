// Tool invoker
//
// Resolves a named capability plus parameter map to a result map. Two tool
// families get special handling required for correctness:
//
// - send_email is two-phase: the first invocation only prepares (recipient,
//   subject, body, ownership-checked attachment metadata, preview) and the
//   step halts at pending_confirmation; the actual send happens through
//   send_prepared_email after an explicit human confirmation.
// - contact-finder tools walk an ordered candidate list (explicit company
//   first, then one candidate per job URL from the last search result) and
//   stop at the first success.
//
// Everything else goes to the registry if registered, otherwise it is
// delegated to the agent as a natural-language instruction.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use agentflow_core::{
    decision, AgentMessage, DocumentMeta, DocumentStore, EmailMessage, EngineError,
    ExecutionContext, MailerTransport, Result, ToolRegistry, UserDirectory,
};

use crate::agent::AgentCaller;

pub struct ToolInvoker {
    registry: ToolRegistry,
    agent: Arc<AgentCaller>,
    documents: Arc<dyn DocumentStore>,
    users: Arc<dyn UserDirectory>,
    mailer: Arc<dyn MailerTransport>,
}

fn is_email_tool(name: &str) -> bool {
    name.contains("send_email") || name.contains("email_versenden")
}

fn is_contact_tool(name: &str) -> bool {
    name.contains("contact") || name.contains("ansprechpartner")
}

impl ToolInvoker {
    pub fn new(
        registry: ToolRegistry,
        agent: Arc<AgentCaller>,
        documents: Arc<dyn DocumentStore>,
        users: Arc<dyn UserDirectory>,
        mailer: Arc<dyn MailerTransport>,
    ) -> Self {
        Self {
            registry,
            agent,
            documents,
            users,
            mailer,
        }
    }

    /// Invoke a named capability. Parameters must already be
    /// placeholder-resolved.
    pub async fn invoke(
        &self,
        tool_name: &str,
        parameters: &Value,
        ctx: &ExecutionContext,
        acting_user: Option<Uuid>,
    ) -> Result<Value> {
        debug!(tool = tool_name, ?acting_user, "Invoking tool");

        if is_email_tool(tool_name) {
            return self.prepare_email(parameters, acting_user).await;
        }
        if is_contact_tool(tool_name) {
            return self.contact_search(tool_name, parameters, ctx, acting_user).await;
        }
        if let Some(tool) = self.registry.get(tool_name) {
            return tool
                .execute(parameters, acting_user)
                .await
                .map_err(|e| match e {
                    err @ EngineError::ToolExecution { .. } => err,
                    other => EngineError::tool(tool_name, other.to_string()),
                });
        }
        self.generic_agent_tool(tool_name, parameters, acting_user)
            .await
    }

    // ========================================================================
    // Email two-phase
    // ========================================================================

    /// Phase 1: resolve recipient/subject/body/attachments and build a
    /// preview. Does NOT send. The caller marks the step
    /// pending_confirmation when it sees `status == "prepared"`.
    async fn prepare_email(&self, parameters: &Value, acting_user: Option<Uuid>) -> Result<Value> {
        let to = string_param(parameters, &["to", "recipient", "empfaenger"]);
        let subject = string_param(parameters, &["subject", "betreff"]);
        let body = string_param(parameters, &["body", "text", "nachricht"]);
        let attachment_ids = attachment_ids(parameters);

        let user = match acting_user {
            Some(id) => self.users.find_user(id).await?,
            None => None,
        };

        // With a known user we can validate attachment ownership now;
        // without one we keep the placeholder ids and re-resolve at send time.
        let mut attachments = Vec::new();
        if let Some(user) = &user {
            for id in &attachment_ids {
                match self.resolve_owned_attachment(id, user.id).await? {
                    Some(doc) => attachments.push(doc),
                    None => warn!(attachment = %id, "Skipping attachment not owned by user"),
                }
            }
        }

        let requires_authentication = user.as_ref().map(|u| !u.has_valid_token).unwrap_or(true);
        let preview = format!("To: {to}\nSubject: {subject}\n\n{body}");

        info!(to = %to, attachments = attachments.len(), "Email prepared, awaiting confirmation");

        Ok(json!({
            "status": "prepared",
            "to": to,
            "subject": subject,
            "body": body,
            "attachment_ids": attachment_ids,
            "attachments": attachments
                .iter()
                .map(|d| json!({
                    "id": d.id,
                    "filename": d.filename,
                    "size": d.size,
                    "mime_type": d.mime_type,
                }))
                .collect::<Vec<_>>(),
            "requires_user_authentication": requires_authentication,
            "preview": preview,
        }))
    }

    /// Phase 2: perform the actual send for a previously prepared email.
    ///
    /// Re-resolves attachments against the resolved user, silently skipping
    /// any the user does not own. Fails with `MissingUserContext` if no user
    /// can be resolved by this point: a prepared email must never be dropped
    /// silently.
    pub async fn send_prepared_email(
        &self,
        prepared: &Value,
        acting_user: Option<Uuid>,
    ) -> Result<Value> {
        let user = match acting_user {
            Some(id) => self.users.find_user(id).await?,
            None => None,
        };
        let user = user.ok_or(EngineError::MissingUserContext)?;

        let to = string_param(prepared, &["to"]);
        if to.is_empty() {
            return Err(EngineError::tool("send_email", "no recipient resolved"));
        }

        let mut attachments = Vec::new();
        for id in attachment_ids(prepared) {
            match self.resolve_owned_attachment(&id, user.id).await? {
                Some(doc) => attachments.push(doc),
                None => warn!(attachment = %id, user = %user.id, "Dropping unowned attachment at send time"),
            }
        }

        let message = EmailMessage {
            to: to.clone(),
            subject: string_param(prepared, &["subject"]),
            body: string_param(prepared, &["body"]),
            attachments,
        };
        let attachment_count = message.attachments.len();

        self.mailer
            .send(&message)
            .await
            .map_err(|e| EngineError::tool("send_email", e.to_string()))?;

        info!(to = %to, attachment_count, "Email sent");

        Ok(json!({
            "status": "sent",
            "to": to,
            "attachment_count": attachment_count,
        }))
    }

    async fn resolve_owned_attachment(
        &self,
        raw_id: &str,
        owner: Uuid,
    ) -> Result<Option<DocumentMeta>> {
        let Ok(id) = raw_id.parse::<Uuid>() else {
            return Ok(None);
        };
        Ok(self
            .documents
            .find(id)
            .await?
            .filter(|doc| doc.owner_user_id == owner))
    }

    // ========================================================================
    // Contact-finder fallback
    // ========================================================================

    /// Try an ordered list of company candidates until one yields contacts.
    ///
    /// A candidate succeeds when the tool reports `success: true` or returns
    /// at least one non-empty email field. Exhausting all candidates fails
    /// with `ContactsNotFound` carrying the attempt count.
    async fn contact_search(
        &self,
        tool_name: &str,
        parameters: &Value,
        ctx: &ExecutionContext,
        acting_user: Option<Uuid>,
    ) -> Result<Value> {
        let tool = self.registry.get(tool_name).ok_or_else(|| {
            EngineError::tool(tool_name, "contact tool not registered")
        })?;

        let candidates = contact_candidates(parameters, ctx);
        if candidates.is_empty() {
            return Err(EngineError::ContactsNotFound { attempts: 0 });
        }

        let mut attempts = 0usize;
        for candidate in &candidates {
            attempts += 1;
            debug!(company = %candidate.company, attempt = attempts, "Trying contact candidate");

            let mut params = json!({ "company": candidate.company });
            if let Some(url) = &candidate.source_url {
                params["url"] = json!(url);
            }

            match tool.execute(&params, acting_user).await {
                Ok(result) if contact_result_succeeded(&result) => {
                    let mut result = result;
                    if let Value::Object(map) = &mut result {
                        map.insert("company".into(), json!(candidate.company));
                        map.insert("attempts".into(), json!(attempts));
                    }
                    return Ok(result);
                }
                Ok(_) => {}
                Err(e) => warn!(company = %candidate.company, error = %e, "Contact candidate failed"),
            }
        }

        Err(EngineError::ContactsNotFound { attempts })
    }

    // ========================================================================
    // Generic tools
    // ========================================================================

    /// No registered handler: describe the call to the agent and take its
    /// textual response as the result. Best-effort, no structured contract
    /// beyond "the call did not throw".
    async fn generic_agent_tool(
        &self,
        tool_name: &str,
        parameters: &Value,
        acting_user: Option<Uuid>,
    ) -> Result<Value> {
        let rendered = serde_json::to_string_pretty(parameters).unwrap_or_default();
        let messages = [
            AgentMessage::system(
                "You execute tools on behalf of a workflow engine. \
                 Perform the requested operation and report the outcome concisely.",
            ),
            AgentMessage::user(format!(
                "Execute the tool '{tool_name}' with these parameters:\n{rendered}"
            )),
        ];

        let response = self
            .agent
            .call(&messages, acting_user)
            .await
            .map_err(|e| EngineError::tool(tool_name, e.to_string()))?;

        Ok(json!({
            "tool_name": tool_name,
            "response": response,
        }))
    }
}

struct ContactCandidate {
    company: String,
    source_url: Option<String>,
}

/// Ordered candidate list: explicit company-name parameter first, then one
/// candidate per job URL from the most recent search-shaped result, using
/// that job's own company field.
fn contact_candidates(parameters: &Value, ctx: &ExecutionContext) -> Vec<ContactCandidate> {
    let mut candidates = Vec::new();
    let mut seen = Vec::new();
    let mut push = |company: String, source_url: Option<String>| {
        let key = company.to_lowercase();
        if !company.is_empty() && !seen.contains(&key) {
            seen.push(key);
            candidates.push(ContactCandidate {
                company,
                source_url,
            });
        }
    };

    let explicit = string_param(parameters, &["company", "company_name", "firma"]);
    if !explicit.is_empty() {
        push(explicit, None);
    }

    if let Some((_, search_result)) = decision::find_last_result(ctx) {
        for key in ["jobs", "results", "items"] {
            if let Some(jobs) = search_result.get(key).and_then(Value::as_array) {
                for job in jobs {
                    let company = string_param(job, &["company", "company_name", "employer"]);
                    let url = job
                        .get("url")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    push(company, url);
                }
                break;
            }
        }
    }

    candidates
}

fn contact_result_succeeded(result: &Value) -> bool {
    if result.get("success").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    for key in ["email", "contact_email"] {
        if let Some(s) = result.get(key).and_then(Value::as_str) {
            if !s.trim().is_empty() {
                return true;
            }
        }
    }
    result
        .get("emails")
        .and_then(Value::as_array)
        .map(|items| !items.is_empty())
        .unwrap_or(false)
}

/// First non-empty string among the given keys
fn string_param(value: &Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_default()
}

fn attachment_ids(value: &Value) -> Vec<String> {
    value
        .get("attachment_ids")
        .or_else(|| value.get("attachments"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(map) => map
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}
