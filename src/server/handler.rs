//! MCP server handler implementation.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::{
        CallToolRequestParam, CallToolResult, Content, ErrorCode, ListToolsResult,
        PaginatedRequestParam, ServerCapabilities, ServerInfo,
    },
    schemars::JsonSchema,
    service::RequestContext,
    tool, tool_router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{DataCatalog, DataFile, SheetDescriptor};
use crate::config::ServerConfig;
use crate::error::{ConfigError, Error, ServerError, ToolError};
use crate::libraries::{LibraryDescriptor, LibraryRegistry};
use crate::sandbox::{
    CodeSandbox, ExecutionRequest, ExecutionResult, MountPolicyGuard, PythonSandbox,
    SandboxConfig,
};

const INSTRUCTIONS: &str = "Tabular data analysis over the files of one data directory. \
    Call list_data_files to see the CSV and spreadsheet files, list_sheets to inspect a \
    spreadsheet, and run_python_code to analyse them with pandas (pd), numpy (np) and \
    matplotlib (plt). Code runs with the data directory as working directory, so open files \
    by bare name. Call list_available_python_libs for the importable libraries. Code runs in \
    an external sandbox; this server's security is exactly as strong as that sandbox.";

/// Arguments of the tools that take none. Any field is rejected.
#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(crate = "rmcp::schemars")]
pub struct NoArgs {}

/// Arguments for `list_sheets`.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(crate = "rmcp::schemars")]
pub struct ListSheetsArgs {
    /// Spreadsheet file name relative to the data directory, e.g. "sales.xlsx"
    #[serde(alias = "filename")]
    pub file_name: String,
}

/// Arguments for `run_python_code`.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(crate = "rmcp::schemars")]
pub struct RunPythonCodeArgs {
    /// Python source to execute. print() output is returned as stdout.
    pub code: String,
}

#[derive(Debug, Serialize)]
struct FilesPayload {
    files: Vec<DataFile>,
}

#[derive(Debug, Serialize)]
struct SheetsPayload {
    file_name: String,
    sheets: Vec<SheetDescriptor>,
}

#[derive(Debug, Serialize)]
struct LibrariesPayload {
    libraries: &'static [LibraryDescriptor],
}

/// The MCP server exposing the tabular data tools.
///
/// Holds no per-call state: every tool call re-reads the data directory and
/// executes code in a fresh sandbox.
#[derive(Clone)]
pub struct TabularServer {
    catalog: DataCatalog,
    registry: LibraryRegistry,
    sandbox: Arc<dyn CodeSandbox>,
    tool_router: ToolRouter<Self>,
}

impl TabularServer {
    /// Creates a server over explicit collaborators.
    #[must_use]
    pub fn new(
        catalog: DataCatalog,
        registry: LibraryRegistry,
        sandbox: Arc<dyn CodeSandbox>,
    ) -> Self {
        Self {
            catalog,
            registry,
            sandbox,
            tool_router: Self::tool_router(),
        }
    }

    /// Validates the configuration and assembles a server with the default
    /// hakoniwa sandbox.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the data directory cannot be created, must not
    /// be mounted, or the library registry is malformed, and `Error::Server` if
    /// the sandbox cannot be created.
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub fn from_config(config: &ServerConfig) -> Result<Self, Error> {
        let catalog = DataCatalog::open(&config.data_dir)?;

        let registry = LibraryRegistry::builtin();
        registry.validate()?;

        MountPolicyGuard::new()
            .validate_mount_source(catalog.root())
            .map_err(ConfigError::DataRootForbidden)?;

        let sandbox_config = SandboxConfig::default()
            .with_python_path(&config.python_path)
            .with_timeout(config.timeout);
        let sandbox = PythonSandbox::new(sandbox_config)
            .map_err(|e| ServerError::InitializationFailed(e.to_string()))?;

        info!(
            data_dir = %catalog.root().display(),
            libraries = registry.list().len(),
            timeout_secs = config.timeout.as_secs(),
            "Server assembled"
        );
        Ok(Self::new(catalog, registry, Arc::new(sandbox)))
    }

    /// Returns the data catalog.
    #[must_use]
    pub fn catalog(&self) -> &DataCatalog {
        &self.catalog
    }

    /// Checks that `name` is a registered tool.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::UnknownTool` otherwise.
    pub fn ensure_known_tool(&self, name: &str) -> Result<(), ToolError> {
        if self.tool_router.has_route(name) {
            Ok(())
        } else {
            Err(ToolError::UnknownTool(name.to_string()))
        }
    }

    /// Names of every registered tool.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.into_owned())
            .collect();
        names.sort();
        names
    }
}

#[tool_router]
impl TabularServer {
    #[tool(
        description = "List the CSV and spreadsheet files in the data directory with their kind and size in bytes."
    )]
    #[instrument(skip_all)]
    async fn list_data_files(
        &self,
        _args: Parameters<NoArgs>,
    ) -> Result<CallToolResult, McpError> {
        let catalog = self.catalog.clone();
        let files = tokio::task::spawn_blocking(move || catalog.list_data_files())
            .await
            .map_err(|e| to_mcp_error(ToolError::io("directory listing task failed", e.into())))?
            .map_err(to_mcp_error)?;
        debug!(count = files.len(), "Listed data files");
        json_result(&FilesPayload { files })
    }

    #[tool(
        description = "List the sheets of a spreadsheet file (.xlsx, .xlsm, .xls, .ods) with the number of data rows (excluding the header row) and columns of each sheet."
    )]
    async fn list_sheets(
        &self,
        Parameters(args): Parameters<ListSheetsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let catalog = self.catalog.clone();
        let file_name = args.file_name;
        debug!(file_name = %file_name, "Listing sheets");
        let sheets = {
            let file_name = file_name.clone();
            tokio::task::spawn_blocking(move || catalog.list_sheets(&file_name))
                .await
                .map_err(|e| to_mcp_error(ToolError::io("spreadsheet reader task failed", e.into())))?
                .map_err(to_mcp_error)?
        };
        debug!(count = sheets.len(), "Listed sheets");
        json_result(&SheetsPayload { file_name, sheets })
    }

    #[tool(
        description = "Execute Python code in a sandbox with the data directory as working directory. pandas (pd), numpy (np) and matplotlib.pyplot (plt) are preloaded; only the libraries from list_available_python_libs can be imported. Returns stdout, stderr and a success flag; open matplotlib figures are returned as PNG images."
    )]
    async fn run_python_code(
        &self,
        Parameters(args): Parameters<RunPythonCodeArgs>,
    ) -> Result<CallToolResult, McpError> {
        debug!(code_len = args.code.len(), "Executing code");
        let request = ExecutionRequest::new(args.code, self.catalog.root())
            .with_libraries(&self.registry);
        let sandbox = Arc::clone(&self.sandbox);

        let result = tokio::task::spawn_blocking(move || sandbox.execute(&request))
            .await
            .map_err(|e| to_mcp_error(ToolError::SandboxFailure(e.to_string())))?
            .map_err(|e| to_mcp_error(e.into()))?;

        if result.success {
            info!(artifacts = result.artifacts.len(), "Code executed");
        } else {
            warn!(stderr_len = result.stderr.len(), "Code execution failed");
        }
        execution_result(&result)
    }

    #[tool(
        description = "List the Python libraries code can import in run_python_code, with the global name each one is preloaded as."
    )]
    #[instrument(skip_all)]
    async fn list_available_python_libs(
        &self,
        _args: Parameters<NoArgs>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&LibrariesPayload {
            libraries: self.registry.list(),
        })
    }
}

impl ServerHandler for TabularServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        info!(tool = %request.name, "Tool call");
        self.ensure_known_tool(&request.name).map_err(to_mcp_error)?;

        let tcc = ToolCallContext::new(self, request, context);
        self.tool_router.call(tcc).await.map_err(tag_invalid_params)
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tool_router.list_all()))
    }
}

/// Converts a tool failure to the MCP error returned to the caller.
///
/// The wire-visible kind is carried in `data.kind`.
pub fn to_mcp_error(err: ToolError) -> McpError {
    let data = Some(json!({ "kind": err.kind() }));
    let message = err.to_string();
    match err {
        ToolError::NotFound(_) => McpError::resource_not_found(message, data),
        ToolError::InvalidInput(_) | ToolError::UnknownTool(_) => {
            McpError::invalid_params(message, data)
        }
        ToolError::Io { .. } | ToolError::SandboxFailure(_) => {
            McpError::internal_error(message, data)
        }
    }
}

/// Argument deserialization failures surface as untagged invalid-params errors.
fn tag_invalid_params(mut err: McpError) -> McpError {
    if err.code == ErrorCode::INVALID_PARAMS && err.data.is_none() {
        err.data = Some(json!({ "kind": "InvalidInputError" }));
    }
    err
}

fn json_result<T: Serialize>(payload: &T) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::json(payload)?]))
}

fn execution_result(result: &ExecutionResult) -> Result<CallToolResult, McpError> {
    let mut content = vec![Content::json(result)?];
    content.extend(
        result
            .artifacts
            .iter()
            .map(|artifact| Content::image(artifact.data.clone(), artifact.mime_type.clone())),
    );
    Ok(if result.success {
        CallToolResult::success(content)
    } else {
        CallToolResult::error(content)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use crate::sandbox::Artifact;
    use rmcp::service::{RunningService, ServiceError};
    use rmcp::{RoleClient, ServiceExt};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records requests and replies with a canned outcome.
    struct FakeSandbox {
        reply: Result<ExecutionResult, String>,
        seen: Mutex<Vec<ExecutionRequest>>,
    }

    impl FakeSandbox {
        fn replying(result: ExecutionResult) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(result),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl CodeSandbox for FakeSandbox {
        fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
            self.seen.lock().expect("lock").push(request.clone());
            self.reply
                .clone()
                .map_err(SandboxError::ExecutionFailed)
        }
    }

    fn server_with(sandbox: Arc<dyn CodeSandbox>) -> (TempDir, TabularServer) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let catalog = DataCatalog::open(dir.path()).expect("open catalog");
        let server = TabularServer::new(catalog, LibraryRegistry::builtin(), sandbox);
        (dir, server)
    }

    fn payload(result: &CallToolResult) -> serde_json::Value {
        let text = result.content[0]
            .as_text()
            .expect("first block is text")
            .text
            .clone();
        serde_json::from_str(&text).expect("json payload")
    }

    /// Serves `server` over an in-memory stream and returns a connected client.
    async fn connect(server: TabularServer) -> RunningService<RoleClient, ()> {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            if let Ok(running) = server.serve(server_io).await {
                let _ = running.waiting().await;
            }
        });
        ().serve(client_io).await.expect("client handshake")
    }

    fn call(name: &str, arguments: Option<serde_json::Value>) -> CallToolRequestParam {
        CallToolRequestParam {
            name: name.to_string().into(),
            arguments: arguments.and_then(|args| args.as_object().cloned()),
        }
    }

    fn mcp_error(err: ServiceError) -> McpError {
        match err {
            ServiceError::McpError(e) => e,
            other => panic!("expected an MCP error, got {other:?}"),
        }
    }

    #[test]
    fn test_registers_exactly_four_tools() {
        let (_dir, server) = server_with(FakeSandbox::replying(ExecutionResult::empty()));
        assert_eq!(
            server.tool_names(),
            vec![
                "list_available_python_libs",
                "list_data_files",
                "list_sheets",
                "run_python_code"
            ]
        );
    }

    #[test]
    fn test_unknown_tool_is_rejected() {
        let (_dir, server) = server_with(FakeSandbox::replying(ExecutionResult::empty()));
        assert!(server.ensure_known_tool("list_sheets").is_ok());

        let err = server.ensure_known_tool("delete_file").expect_err("unknown");
        let mcp = to_mcp_error(err);
        assert_eq!(mcp.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(mcp.data, Some(json!({ "kind": "UnknownToolError" })));
    }

    #[test]
    fn test_error_codes() {
        let not_found = to_mcp_error(ToolError::NotFound("a.xlsx".into()));
        assert_eq!(not_found.code, ErrorCode::RESOURCE_NOT_FOUND);
        assert_eq!(not_found.data, Some(json!({ "kind": "NotFoundError" })));
        assert!(not_found.message.contains("a.xlsx"));

        let io = to_mcp_error(ToolError::io("reading", std::io::Error::other("boom")));
        assert_eq!(io.code, ErrorCode::INTERNAL_ERROR);
        assert_eq!(io.data, Some(json!({ "kind": "IOError" })));

        let sandbox = to_mcp_error(ToolError::SandboxFailure("spawn".into()));
        assert_eq!(sandbox.code, ErrorCode::INTERNAL_ERROR);
    }

    #[test]
    fn test_tag_invalid_params_keeps_existing_data() {
        let untagged = tag_invalid_params(McpError::invalid_params("missing field `code`", None));
        assert_eq!(untagged.data, Some(json!({ "kind": "InvalidInputError" })));

        let tagged = tag_invalid_params(to_mcp_error(ToolError::UnknownTool("x".into())));
        assert_eq!(tagged.data, Some(json!({ "kind": "UnknownToolError" })));

        let internal = tag_invalid_params(McpError::internal_error("boom", None));
        assert!(internal.data.is_none());
    }

    #[test]
    fn test_list_sheets_args_accept_alias_and_reject_unknown_fields() {
        let args: ListSheetsArgs =
            serde_json::from_value(json!({ "filename": "sales.xlsx" })).expect("alias");
        assert_eq!(args.file_name, "sales.xlsx");

        let err = serde_json::from_value::<ListSheetsArgs>(
            json!({ "file_name": "a.xlsx", "sheet": "x" }),
        );
        assert!(err.is_err());

        let err = serde_json::from_value::<RunPythonCodeArgs>(json!({}));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_list_data_files_tool() {
        let (dir, server) = server_with(FakeSandbox::replying(ExecutionResult::empty()));
        fs::write(dir.path().join("b.csv"), "x\n1\n").expect("write");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let result = server
            .list_data_files(Parameters(NoArgs {}))
            .await
            .expect("tool result");
        assert_eq!(
            payload(&result),
            json!({ "files": [{ "name": "b.csv", "kind": "csv", "size_bytes": 4 }] })
        );
    }

    #[tokio::test]
    async fn test_list_sheets_not_found() {
        let (_dir, server) = server_with(FakeSandbox::replying(ExecutionResult::empty()));
        let err = server
            .list_sheets(Parameters(ListSheetsArgs {
                file_name: "nonexistent.xlsx".into(),
            }))
            .await
            .expect_err("missing file");
        assert_eq!(err.code, ErrorCode::RESOURCE_NOT_FOUND);
        assert_eq!(err.data, Some(json!({ "kind": "NotFoundError" })));
    }

    #[tokio::test]
    async fn test_list_sheets_rejects_traversal() {
        let (_dir, server) = server_with(FakeSandbox::replying(ExecutionResult::empty()));
        let err = server
            .list_sheets(Parameters(ListSheetsArgs {
                file_name: "../etc/passwd".into(),
            }))
            .await
            .expect_err("traversal");
        assert_eq!(err.data, Some(json!({ "kind": "InvalidInputError" })));
    }

    #[tokio::test]
    async fn test_run_python_code_forwards_request() {
        let fake = FakeSandbox::replying(ExecutionResult {
            stdout: "hi\n".into(),
            success: true,
            ..ExecutionResult::default()
        });
        let (_dir, server) = server_with(fake.clone());

        let result = server
            .run_python_code(Parameters(RunPythonCodeArgs {
                code: "print('hi')".into(),
            }))
            .await
            .expect("tool result");
        assert_eq!(result.is_error, Some(false));
        assert_eq!(payload(&result)["stdout"], "hi\n");

        let seen = fake.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code, "print('hi')");
        assert_eq!(seen[0].data_root, server.catalog().root());
        assert!(seen[0].permitted_imports.contains(&"pandas".to_string()));
    }

    #[tokio::test]
    async fn test_run_python_code_failure_is_in_band() {
        let fake = FakeSandbox::replying(ExecutionResult {
            stderr: "ImportError: import of 'os' is not permitted in this sandbox\n".into(),
            success: false,
            ..ExecutionResult::default()
        });
        let (_dir, server) = server_with(fake);

        let result = server
            .run_python_code(Parameters(RunPythonCodeArgs {
                code: "import os".into(),
            }))
            .await
            .expect("failed code is still a result");
        assert_eq!(result.is_error, Some(true));
        let body = payload(&result);
        assert_eq!(body["success"], false);
        assert!(body["stderr"].as_str().unwrap_or_default().contains("os"));
    }

    #[tokio::test]
    async fn test_run_python_code_attaches_images() {
        let fake = FakeSandbox::replying(ExecutionResult {
            success: true,
            artifacts: vec![Artifact {
                name: "figure_01.png".into(),
                mime_type: "image/png".into(),
                data: "iVBORw0KGgo=".into(),
            }],
            ..ExecutionResult::default()
        });
        let (_dir, server) = server_with(fake);

        let result = server
            .run_python_code(Parameters(RunPythonCodeArgs {
                code: "plt.plot([1, 2])".into(),
            }))
            .await
            .expect("tool result");
        assert_eq!(result.content.len(), 2);
        let image = result.content[1].as_image().expect("image block");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "iVBORw0KGgo=");
    }

    #[tokio::test]
    async fn test_sandbox_failure_is_an_error() {
        let (_dir, server) = server_with(FakeSandbox::failing("failed to spawn python"));
        let err = server
            .run_python_code(Parameters(RunPythonCodeArgs {
                code: "print(1)".into(),
            }))
            .await
            .expect_err("infrastructure failure");
        assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
        assert_eq!(err.data, Some(json!({ "kind": "SandboxFailure" })));
    }

    #[tokio::test]
    async fn test_list_available_python_libs_tool() {
        let (_dir, server) = server_with(FakeSandbox::replying(ExecutionResult::empty()));
        let result = server
            .list_available_python_libs(Parameters(NoArgs {}))
            .await
            .expect("tool result");
        let body = payload(&result);
        let libraries = body["libraries"].as_array().expect("array");
        assert!(libraries.iter().any(|l| l["name"] == "pandas" && l["preloaded_as"] == "pd"));
        assert!(libraries.iter().all(|l| l.get("preload_module").is_none()));
    }

    #[test]
    fn test_info_mentions_sandbox_trust() {
        let (_dir, server) = server_with(FakeSandbox::replying(ExecutionResult::empty()));
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap_or_default().contains("sandbox"));
    }

    #[tokio::test]
    async fn test_dispatch_through_client() {
        let (dir, server) = server_with(FakeSandbox::replying(ExecutionResult::empty()));
        fs::write(dir.path().join("a.csv"), "x\n1\n").expect("write");
        let client = connect(server).await;

        let tools = client.list_all_tools().await.expect("list tools");
        assert_eq!(tools.len(), 4);

        let listed = client
            .call_tool(call("list_data_files", None))
            .await
            .expect("list_data_files");
        assert_eq!(payload(&listed)["files"][0]["name"], "a.csv");

        let libs = client
            .call_tool(call("list_available_python_libs", Some(json!({}))))
            .await
            .expect("list_available_python_libs");
        assert_eq!(libs.is_error, Some(false));

        client.cancel().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_dispatch_rejects_unknown_tool_and_bad_arguments() {
        let (_dir, server) = server_with(FakeSandbox::replying(ExecutionResult::empty()));
        let client = connect(server).await;

        let unknown = client
            .call_tool(call("delete_file", Some(json!({ "file_name": "a.csv" }))))
            .await
            .map(|_| ())
            .map_err(mcp_error)
            .expect_err("unknown tool");
        assert_eq!(unknown.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(unknown.data, Some(json!({ "kind": "UnknownToolError" })));

        let malformed = [
            call("list_sheets", Some(json!({ "file_name": 7 }))),
            call("list_sheets", None),
            call("run_python_code", Some(json!({ "code": "print(1)", "timeout": 5 }))),
            call("list_data_files", Some(json!({ "x": 1 }))),
            call("list_available_python_libs", Some(json!({ "verbose": true }))),
        ];
        for request in malformed {
            let name = request.name.clone();
            let err = client
                .call_tool(request)
                .await
                .map(|_| ())
                .map_err(mcp_error)
                .expect_err("malformed arguments");
            assert_eq!(err.code, ErrorCode::INVALID_PARAMS, "{name}");
            assert_eq!(err.data, Some(json!({ "kind": "InvalidInputError" })), "{name}");
        }

        client.cancel().await.expect("shutdown");
    }
}
