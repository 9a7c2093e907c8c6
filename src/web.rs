use colored::*;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::client::ChatBackend;
use crate::config::LabConfig;
use crate::error::LabError;
use crate::export::export_transcript;
use crate::notes::submit_notes;
use crate::persona::Identity;
use crate::store::SessionStore;

/// Cookie naming the caller's session.
pub const SESSION_COOKIE: &str = "lab_session";

const MAX_HEADERS: usize = 32;
const MAX_BODY_BYTES: usize = 1 << 20;
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Embedded single-page experiment form: identity gate and metrics in the
/// sidebar, chat in the main panel, notes and submission underneath.
pub const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="zh">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>心理实验平台 🌱</title>
<style>
*{box-sizing:border-box}
body{margin:0;font-family:system-ui,sans-serif;background:#f6f8fa;color:#1f2328;display:flex;min-height:100vh}
aside{width:280px;background:#fff;border-right:1px solid #d0d7de;padding:16px}
main{flex:1;padding:16px;display:flex;flex-direction:column;gap:16px}
h1{margin:0 0 8px;font-size:22px}
h2{font-size:16px;margin:16px 0 8px}
.metric{margin:6px 0}.metric b{display:block;font-size:20px}
button{padding:6px 12px;border-radius:6px;border:1px solid #d0d7de;background:#fff;cursor:pointer}
button.primary{background:#1f883d;color:#fff;border-color:#1f883d}
#chat{height:480px;overflow-y:auto;background:#fff;border:1px solid #d0d7de;border-radius:8px;padding:12px}
.msg{margin:8px 0;padding:8px 12px;border-radius:8px;white-space:pre-wrap;max-width:80%}
.msg.user{background:#ddf4ff;margin-left:auto}
.msg.assistant{background:#f6f8fa;border:1px solid #d0d7de}
#gate-notice{padding:12px;background:#fff8c5;border:1px solid #d4a72c;border-radius:8px}
#chat-form{display:flex;gap:8px}#chat-input{flex:1;padding:8px}
#panel{display:flex;gap:16px}#panel>div{flex:1}
textarea{width:100%;height:240px;padding:8px}
.error{color:#cf222e}.warn{color:#9a6700}.ok{color:#1a7f37}
</style>
</head>
<body>
<aside>
  <h2>被试人员身份</h2>
  <label><input type="radio" name="identity" value="1"> 1</label>
  <label><input type="radio" name="identity" value="2"> 2</label>
  <button id="confirm" class="primary" title="请先选择身份后点击确认">🔒 确认身份</button>
  <div id="identity-msg"></div>
  <h2>实验数据监控</h2>
  <div class="metric">有效对话轮次<b id="m-turns">0次</b></div>
  <div class="metric">净交流时长<b id="m-net">0秒</b></div>
  <div class="metric">总实验时长<b id="m-total">N/A</b></div>
  <hr>
  <button id="export">📥 导出对话记录</button>
  <div id="export-msg"></div>
</aside>
<main>
  <h1>心理实验平台 🌱</h1>
  <h2>AI 对话助手</h2>
  <div id="gate-notice">👋 请先在左侧边栏选择被试身份并点击【确认身份】按钮</div>
  <div id="chat-area" hidden>
    <div id="chat"></div>
    <form id="chat-form"><input id="chat-input" placeholder="请输入您问题..." autocomplete="off"><button class="primary">发送</button></form>
  </div>
  <div id="panel">
    <div>
      <h2>最终成果</h2>
      <textarea id="notes" placeholder="在此记录您的成果 👇"></textarea>
    </div>
    <div>
      <h2>数据提交</h2>
      <button id="submit" class="primary">✅ 提交记录并跳转到量表填写部分</button>
      <div id="submit-msg"></div>
    </div>
  </div>
</main>
<script>
const $=s=>document.querySelector(s);
async function api(path,body){
  const r=await fetch(path,{method:body===undefined?'GET':'POST',headers:{'Content-Type':'application/json'},body:body===undefined?undefined:JSON.stringify(body)});
  const ct=r.headers.get('Content-Type')||'';
  const data=ct.includes('json')?await r.json():await r.blob();
  if(!r.ok)throw data;
  return data;
}
function esc(s){const d=document.createElement('div');d.textContent=s;return d.innerHTML}
function render(st){
  $('#m-turns').textContent=st.turns+'次';
  $('#m-net').textContent=st.net_duration;
  $('#m-total').textContent=st.total_duration;
  document.querySelectorAll('input[name=identity]').forEach(r=>{r.checked=st.identity!==null&&Number(r.value)===st.identity});
  $('#gate-notice').hidden=st.identity_confirmed;
  $('#chat-area').hidden=!st.identity_confirmed;
  $('#chat').innerHTML=st.transcript.map(m=>`<div class="msg ${m.role}">${esc(m.content)}</div>`).join('');
  $('#chat').scrollTop=$('#chat').scrollHeight;
  if(document.activeElement!==$('#notes'))$('#notes').value=st.notes;
}
function selected(){const r=document.querySelector('input[name=identity]:checked');return r?Number(r.value):0}
document.querySelectorAll('input[name=identity]').forEach(r=>r.onchange=async()=>render(await api('/api/identity/select',{identity:selected()})));
$('#confirm').onclick=async()=>{
  try{render(await api('/api/identity/confirm',{identity:selected()}));$('#identity-msg').innerHTML='<span class="ok">✅ 身份验证成功，请开始实验！</span>'}
  catch(e){$('#identity-msg').innerHTML='<span class="error">'+esc(e.error||'请选择有效身份（1或2）')+'</span>'}
};
$('#chat-form').onsubmit=async ev=>{
  ev.preventDefault();
  const text=$('#chat-input').value;
  if(!text.trim())return;
  $('#chat-input').value='';
  $('#chat').insertAdjacentHTML('beforeend',`<div class="msg user">${esc(text)}</div>`);
  try{const r=await api('/api/chat',{text});render(r.state)}
  catch(e){$('#chat').insertAdjacentHTML('beforeend',`<div class="msg assistant error">${esc(e.error||String(e))}</div>`)}
};
let notesTimer=null;
$('#notes').oninput=()=>{clearTimeout(notesTimer);notesTimer=setTimeout(()=>api('/api/notes',{notes:$('#notes').value}),300)};
$('#export').onclick=async()=>{
  try{
    const blob=await api('/api/export',{});
    const a=document.createElement('a');a.href=URL.createObjectURL(blob);a.download='dialogue_record.txt';a.click();
    $('#export-msg').textContent='';
  }catch(e){$('#export-msg').innerHTML='<span class="warn">'+esc(e.error||'没有对话记录可导出')+'</span>'}
};
$('#submit').onclick=async()=>{
  try{
    const r=await api('/api/submit',{notes:$('#notes').value});
    render(r.state);
    if(r.redirect){
      window.open(r.redirect,'_blank');
      $('#submit-msg').innerHTML='<p class="ok">🚀 记录已保存，正在跳转问卷页面...</p><p class="error">⚠️ 如果长时间未跳转，请直接访问：<a target="_blank" href="'+esc(r.redirect)+'">问卷链接</a><br>或手动复制：<code>'+esc(r.redirect)+'</code></p>';
    }
  }catch(e){$('#submit-msg').innerHTML='<span class="error">'+esc(e.error||'请先填写观察记录')+'</span>'}
};
api('/api/state').then(render);
</script>
</body>
</html>"##;

/// Shared state handed to every connection.
pub struct AppContext {
    pub config: LabConfig,
    pub backend: Arc<dyn ChatBackend>,
    pub store: SessionStore,
}

impl AppContext {
    pub fn new(config: LabConfig, backend: Arc<dyn ChatBackend>) -> Self {
        Self { config, backend, store: SessionStore::new() }
    }
}

/// A parsed HTTP request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of the session cookie, if the browser sent one.
    pub fn session_id(&self) -> Option<&str> {
        self.header("cookie")?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == SESSION_COOKIE)
            .map(|(_, v)| v)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            headers: Vec::new(),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn error(err: &LabError) -> Self {
        Self::json(err.status(), json!({ "error": err.to_string(), "kind": err.kind() }))
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain",
            headers: Vec::new(),
            body: b"Not Found".to_vec(),
        }
    }

    fn method_not_allowed() -> Self {
        Self {
            status: 405,
            content_type: "text/plain",
            headers: Vec::new(),
            body: b"Method Not Allowed".to_vec(),
        }
    }

    /// Serialize status line, headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len()
        );
        for (k, v) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", k, v));
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        502 => "Bad Gateway",
        _ => "Internal Server Error",
    }
}

#[derive(Deserialize)]
struct IdentityBody {
    identity: u8,
}

#[derive(Deserialize)]
struct ChatBody {
    text: String,
}

#[derive(Deserialize)]
struct NotesBody {
    notes: String,
}

/// Read one request off `stream`: headers via httparse, then the body up to
/// `Content-Length`.
pub async fn read_request(stream: &mut TcpStream) -> Result<Option<Request>, LabError> {
    let mut buf: Vec<u8> = Vec::with_capacity(8192);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut headers);
        let status = parsed
            .parse(&buf)
            .map_err(|e| LabError::validation(format!("malformed request: {e}")))?;
        let header_len = match status {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial if buf.len() > MAX_BODY_BYTES => {
                return Err(LabError::validation("request headers too large"));
            }
            httparse::Status::Partial => continue,
        };

        let mut request = Request {
            method: parsed.method.unwrap_or("GET").to_string(),
            path: parsed.path.unwrap_or("/").to_string(),
            headers: parsed
                .headers
                .iter()
                .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                .collect(),
            body: Vec::new(),
        };
        let content_length: usize = request
            .header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        if content_length > MAX_BODY_BYTES {
            return Err(LabError::validation("request body too large"));
        }

        let mut body = buf.split_off(header_len);
        while body.len() < content_length {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(content_length);
        request.body = body;
        return Ok(Some(request));
    }
}

/// Every API path and the method it answers to.
const API_ROUTES: &[(&str, &str)] = &[
    ("GET", "/api/state"),
    ("POST", "/api/identity/select"),
    ("POST", "/api/identity/confirm"),
    ("POST", "/api/chat"),
    ("POST", "/api/notes"),
    ("POST", "/api/export"),
    ("POST", "/api/submit"),
];

/// 404 or 405 for requests no API route accepts, so they never touch the
/// session store.
fn check_api_route(method: &str, path: &str) -> Option<Response> {
    match API_ROUTES.iter().find(|(_, p)| *p == path) {
        None => Some(Response::not_found()),
        Some((m, _)) if *m != method => Some(Response::method_not_allowed()),
        Some(_) => None,
    }
}

/// Dispatch one request against its session and build the response.
pub async fn route(ctx: &AppContext, request: &Request) -> Response {
    let path = request.path.split('?').next().unwrap_or("/");

    if path == "/" {
        return if request.method == "GET" {
            Response::html(INDEX_HTML)
        } else {
            Response::method_not_allowed()
        };
    }
    if !path.starts_with("/api/") {
        return Response::not_found();
    }

    if let Some(rejected) = check_api_route(&request.method, path) {
        return rejected;
    }

    let (session_id, session, fresh_cookie) =
        match request.session_id().and_then(|id| ctx.store.get(id).map(|s| (id, s))) {
            Some((id, session)) => (id.to_string(), session, false),
            None => {
                let (id, session) = ctx.store.create();
                debug!(session = %id, sessions = ctx.store.session_count(), "session created");
                (id, session, true)
            }
        };

    let mut response = match route_api(ctx, request, path, &session).await {
        Ok(r) => r,
        Err(e) => {
            debug!(kind = e.kind(), error = %e, "request rejected");
            Response::error(&e)
        }
    };
    if fresh_cookie {
        response.headers.push((
            "Set-Cookie".to_string(),
            format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, session_id),
        ));
    }
    response
}

async fn route_api(
    ctx: &AppContext,
    request: &Request,
    path: &str,
    session: &crate::store::SharedSession,
) -> Result<Response, LabError> {
    let mut state = session.lock().await;
    match (request.method.as_str(), path) {
        ("GET", "/api/state") => Ok(Response::json(200, serde_json::to_value(state.view())?)),
        ("POST", "/api/identity/select") => {
            let body: IdentityBody = serde_json::from_slice(&request.body)?;
            state.select_identity(Identity::from_number(body.identity)?);
            Ok(Response::json(200, serde_json::to_value(state.view())?))
        }
        ("POST", "/api/identity/confirm") => {
            let body: IdentityBody = serde_json::from_slice(&request.body)?;
            state.confirm_identity(body.identity)?;
            Ok(Response::json(200, serde_json::to_value(state.view())?))
        }
        ("POST", "/api/chat") => {
            let body: ChatBody = serde_json::from_slice(&request.body)?;
            let outcome = state
                .submit_user_message(&body.text, ctx.backend.as_ref(), ctx.config.context_window)
                .await?;
            Ok(Response::json(200, json!({ "outcome": outcome, "state": state.view() })))
        }
        ("POST", "/api/notes") => {
            let body: NotesBody = serde_json::from_slice(&request.body)?;
            state.set_notes(body.notes);
            Ok(Response::json(200, serde_json::to_value(state.view())?))
        }
        ("POST", "/api/export") => {
            let exported = export_transcript(&state, &ctx.config.output_dir)?;
            Ok(Response {
                status: 200,
                content_type: "text/plain; charset=utf-8",
                headers: vec![(
                    "Content-Disposition".to_string(),
                    format!("attachment; filename=\"{}\"", exported.file_name),
                )],
                body: exported.body.into_bytes(),
            })
        }
        ("POST", "/api/submit") => {
            let body: NotesBody = serde_json::from_slice(&request.body)?;
            submit_notes(&mut state, &body.notes, &ctx.config.output_dir, chrono::Local::now())?;
            let redirect = state.take_redirect(&ctx.config.survey_url);
            Ok(Response::json(200, json!({ "redirect": redirect, "state": state.view() })))
        }
        _ => Ok(Response::not_found()),
    }
}

/// [`read_request`] bounded by `limit`. A client that sends nothing in time
/// is treated like one that closed the connection.
pub async fn read_request_within(
    stream: &mut TcpStream,
    limit: Duration,
) -> Result<Option<Request>, LabError> {
    match tokio::time::timeout(limit, read_request(stream)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(limit_secs = limit.as_secs_f64(), "request read timed out");
            Ok(None)
        }
    }
}

async fn handle_connection(mut stream: TcpStream, ctx: Arc<AppContext>) -> Result<(), LabError> {
    let response = match read_request_within(&mut stream, READ_TIMEOUT).await {
        Ok(Some(request)) => route(&ctx, &request).await,
        Ok(None) => return Ok(()),
        Err(e) => Response::error(&e),
    };
    stream.write_all(&response.to_bytes()).await?;
    Ok(())
}

/// Accept connections on `listener` until the process stops.
pub async fn serve_on(listener: TcpListener, ctx: Arc<AppContext>) -> Result<(), LabError> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, ctx).await {
                warn!(peer = %addr, error = %e, "connection error");
            }
        });
    }
}

fn open_browser(url: &str) {
    #[cfg(target_os = "windows")]
    {
        let _ = std::process::Command::new("cmd")
            .args(["/C", &format!("start {}", url)])
            .spawn();
    }
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open").arg(url).spawn();
    }
}

/// Start the experiment form server and optionally open the browser.
pub async fn serve(ctx: AppContext, launch_browser: bool) -> Result<(), LabError> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", ctx.config.port)).await?;
    let url = format!("http://localhost:{}", ctx.config.port);

    eprintln!("{}", format!("  Experiment form running at {}", url).bright_green());
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());
    info!(
        port = ctx.config.port,
        model = %ctx.config.model,
        output_dir = %ctx.config.output_dir.display(),
        "server started"
    );

    if launch_browser {
        open_browser(&url);
    }

    serve_on(listener, Arc::new(ctx)).await
}
