//! Server-side script commands: group, map-reduce and eval.
//!
//! Group runs in one of two modes:
//!
//! - [`GroupMode::Command`] sends a native `group` command. Failures are
//!   server errors.
//! - [`GroupMode::Scripted`] renders a procedure from [`GROUP_TEMPLATE`] and
//!   submits it with `$eval`. The keys, condition, initial accumulator and
//!   namespace travel in the script's scope. Failures are evaluation errors.

use bson::{Bson, Document, JavaScriptCodeWithScope, doc};

use crate::{
    command::AdminCommand,
    error::{CommandError, CommandResult},
    executor::{is_ok, number_field},
    namespace::Namespace,
    query::SortSpec,
};

/// Server-side code, optionally with bound variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    Code(String),
    CodeWithScope { code: String, scope: Document },
}

impl Script {
    pub fn with_scope(code: impl Into<String>, scope: Document) -> Self {
        Script::CodeWithScope { code: code.into(), scope }
    }

    pub fn code(&self) -> &str {
        match self {
            Script::Code(code) => code,
            Script::CodeWithScope { code, .. } => code,
        }
    }

    pub fn scope(&self) -> Option<&Document> {
        match self {
            Script::Code(_) => None,
            Script::CodeWithScope { scope, .. } => Some(scope),
        }
    }
}

impl From<&str> for Script {
    fn from(code: &str) -> Self {
        Script::Code(code.to_string())
    }
}

impl From<String> for Script {
    fn from(code: String) -> Self {
        Script::Code(code)
    }
}

impl From<&Script> for Bson {
    fn from(script: &Script) -> Self {
        match script {
            Script::Code(code) => Bson::JavaScriptCode(code.clone()),
            Script::CodeWithScope { code, scope } => Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
                code: code.clone(),
                scope: scope.clone(),
            }),
        }
    }
}

/// A script source with `%%name%%` substitution points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptTemplate {
    source: &'static str,
}

impl ScriptTemplate {
    /// Delimiter around placeholder names.
    pub const DELIMITER: &'static str = "%%";

    pub const fn new(source: &'static str) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Substitutes every binding into the template.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] if a value contains the delimiter,
    /// a binding names no placeholder, or a placeholder is left unbound.
    pub fn render(&self, bindings: &[(&str, &str)]) -> CommandResult<String> {
        let mut rendered = self.source.to_string();

        for (name, value) in bindings {
            if value.contains(Self::DELIMITER) {
                return Err(CommandError::Validation(format!(
                    "value bound to '{}' must not contain '{}'",
                    name,
                    Self::DELIMITER
                )));
            }

            let placeholder = format!("{0}{1}{0}", Self::DELIMITER, name);
            if !rendered.contains(&placeholder) {
                return Err(CommandError::Validation(format!("template has no placeholder '{}'", name)));
            }
            rendered = rendered.replace(&placeholder, value);
        }

        if rendered.contains(Self::DELIMITER) {
            return Err(CommandError::Validation("template has unbound placeholders".into()));
        }

        Ok(rendered)
    }
}

/// The scripted group procedure. `ns`, `keys`, `condition` and `initial` come
/// from the scope; `%%reduce%%` is the reduce function source.
pub const GROUP_TEMPLATE: ScriptTemplate = ScriptTemplate::new(
    r#"function () {
    var c = db[ns].find(condition);
    var map = new Map();
    var reduce_function = %%reduce%%;
    while (c.hasNext()) {
        var obj = c.next();
        var key = {};
        for (var i = 0; i < keys.length; i++) {
            var k = keys[i];
            key[k] = obj[k];
        }
        var aggObj = map.get(key);
        if (aggObj == null) {
            var newObj = Object.extend({}, key);
            aggObj = Object.extend(newObj, initial);
            map.put(key, aggObj);
        }
        reduce_function(obj, aggObj);
    }
    return { "result": map.values() };
}"#,
);

/// How documents are grouped.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKeys {
    /// Group by these fields.
    Fields(Vec<String>),
    /// Group by the key a function computes. Command mode only.
    Function(Script),
}

impl From<Vec<&str>> for GroupKeys {
    fn from(fields: Vec<&str>) -> Self {
        GroupKeys::Fields(fields.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for GroupKeys {
    fn from(fields: Vec<String>) -> Self {
        GroupKeys::Fields(fields)
    }
}

/// The keys of a document, e.g. `{a: true, b: true}`, as group fields.
impl From<Document> for GroupKeys {
    fn from(keys: Document) -> Self {
        GroupKeys::Fields(keys.keys().cloned().collect())
    }
}

impl From<Script> for GroupKeys {
    fn from(function: Script) -> Self {
        GroupKeys::Function(function)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupMode {
    /// Native `group` command.
    #[default]
    Command,
    /// Rendered procedure submitted with `$eval`.
    Scripted,
}

/// Scope names the scripted group procedure binds for itself.
pub const GROUP_SCOPE_BINDINGS: [&str; 4] = ["ns", "keys", "condition", "initial"];

/// A group request.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub keys: GroupKeys,
    pub condition: Document,
    pub initial: Document,
    pub reduce: Script,
    /// Applied to each group in command mode; ignored in scripted mode.
    pub finalize: Option<Script>,
    pub mode: GroupMode,
}

impl GroupSpec {
    pub fn new(keys: impl Into<GroupKeys>, reduce: impl Into<Script>) -> Self {
        GroupSpec {
            keys: keys.into(),
            condition: Document::new(),
            initial: Document::new(),
            reduce: reduce.into(),
            finalize: None,
            mode: GroupMode::Command,
        }
    }

    pub fn condition(mut self, condition: Document) -> Self {
        self.condition = condition;
        self
    }

    pub fn initial(mut self, initial: Document) -> Self {
        self.initial = initial;
        self
    }

    pub fn finalize(mut self, finalize: impl Into<Script>) -> Self {
        self.finalize = Some(finalize.into());
        self
    }

    pub fn mode(mut self, mode: GroupMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builds the native group command.
    pub fn to_command(&self, namespace: &Namespace) -> AdminCommand {
        let mut group = doc! {
            "ns": namespace.collection(),
            "$reduce": Bson::from(&self.reduce),
            "cond": self.condition.clone(),
            "initial": self.initial.clone(),
        };

        if let Some(finalize) = &self.finalize {
            group.insert("finalize", Bson::from(finalize));
        }

        match &self.keys {
            GroupKeys::Fields(fields) => {
                let key: Document = fields
                    .iter()
                    .map(|field| (field.clone(), Bson::Boolean(true)))
                    .collect();
                group.insert("key", key);
            }
            GroupKeys::Function(function) => {
                group.insert("$keyf", Bson::from(function));
            }
        }

        AdminCommand::new(namespace.database(), doc! { "group": group })
    }

    /// Renders the scripted group procedure.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] if the keys are a function, the
    /// reduce source contains the template delimiter, or the reduce scope
    /// defines one of the names the procedure binds (see
    /// [`GROUP_SCOPE_BINDINGS`]).
    pub fn to_script(&self, namespace: &Namespace) -> CommandResult<Script> {
        let GroupKeys::Fields(fields) = &self.keys else {
            return Err(CommandError::Validation("scripted group requires a list of key fields".into()));
        };

        let code = GROUP_TEMPLATE.render(&[("reduce", self.reduce.code())])?;

        let mut scope = self.reduce.scope().cloned().unwrap_or_default();
        if let Some(name) = GROUP_SCOPE_BINDINGS
            .iter()
            .find(|name| scope.contains_key(**name))
        {
            return Err(CommandError::Validation(format!(
                "reduce scope variable '{}' is reserved by the group procedure",
                name
            )));
        }
        scope.insert("ns", namespace.collection());
        scope.insert(
            "keys",
            fields
                .iter()
                .map(|field| Bson::String(field.clone()))
                .collect::<Vec<_>>(),
        );
        scope.insert("condition", self.condition.clone());
        scope.insert("initial", self.initial.clone());

        Ok(Script::CodeWithScope { code, scope })
    }
}

/// The `$eval` command running `script` with `args`.
pub fn eval_command(database: &str, script: &Script, args: Vec<Bson>) -> AdminCommand {
    AdminCommand::new(database, doc! { "$eval": Bson::from(script), "args": args })
}

/// Reads the result of a native group command.
///
/// # Errors
///
/// Returns [`CommandError::Server`] if `retval` is missing or null.
pub fn group_result(reply: &Document) -> CommandResult<Bson> {
    match reply.get("retval") {
        None | Some(Bson::Null) => Err(CommandError::server(format!(
            "group command failed: {}",
            reply.get_str("errmsg").unwrap_or("no result returned")
        ))),
        Some(retval) => Ok(retval.clone()),
    }
}

/// Reads the result of an `$eval` command.
///
/// # Errors
///
/// Returns [`CommandError::Evaluation`] if the reply reports failure.
pub fn eval_result(reply: &Document) -> CommandResult<Bson> {
    if !is_ok(reply) {
        let message = reply
            .get_str("errmsg")
            .or_else(|_| reply.get_str("$err"))
            .unwrap_or("script evaluation failed");
        return Err(CommandError::Evaluation(message.to_string()));
    }

    Ok(reply.get("retval").cloned().unwrap_or(Bson::Null))
}

/// Reads the result of a scripted group: `retval.result` if present, else
/// `retval`.
///
/// # Errors
///
/// See [`eval_result`].
pub fn scripted_group_result(reply: &Document) -> CommandResult<Bson> {
    match eval_result(reply)? {
        Bson::Document(mut retval) => Ok(retval
            .remove("result")
            .unwrap_or(Bson::Document(retval))),
        other => Ok(other),
    }
}

/// Where map-reduce output goes.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MapReduceOut {
    /// Return results in the reply.
    #[default]
    Inline,
    /// Replace the named collection.
    Replace(String),
    /// Merge into the named collection.
    Merge(String),
    /// Reduce into the named collection.
    Reduce(String),
}

impl MapReduceOut {
    fn to_bson(&self) -> Bson {
        match self {
            MapReduceOut::Inline => Bson::Document(doc! { "inline": 1 }),
            MapReduceOut::Replace(name) => Bson::Document(doc! { "replace": name.as_str() }),
            MapReduceOut::Merge(name) => Bson::Document(doc! { "merge": name.as_str() }),
            MapReduceOut::Reduce(name) => Bson::Document(doc! { "reduce": name.as_str() }),
        }
    }
}

/// Optional parts of a map-reduce.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapReduceOptions {
    pub out: MapReduceOut,
    pub query: Option<Document>,
    pub sort: Option<SortSpec>,
    pub limit: Option<i64>,
    pub finalize: Option<Script>,
    /// Global variables for map, reduce and finalize.
    pub scope: Option<Document>,
    pub verbose: bool,
}

impl MapReduceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn out(mut self, out: MapReduceOut) -> Self {
        self.out = out;
        self
    }

    pub fn query(mut self, query: Document) -> Self {
        self.query = Some(query);
        self
    }

    pub fn sort(mut self, sort: impl Into<SortSpec>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn finalize(mut self, finalize: impl Into<Script>) -> Self {
        self.finalize = Some(finalize.into());
        self
    }

    pub fn scope(mut self, scope: Document) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Builds `{mapreduce, map, reduce, out, ...}`.
pub fn map_reduce_command(namespace: &Namespace, map: &Script, reduce: &Script, options: &MapReduceOptions) -> AdminCommand {
    let mut command = doc! {
        "mapreduce": namespace.collection(),
        "map": Bson::from(map),
        "reduce": Bson::from(reduce),
        "out": options.out.to_bson(),
    };

    if let Some(query) = &options.query {
        command.insert("query", query.clone());
    }
    if let Some(sort) = &options.sort {
        command.insert("sort", sort.to_document());
    }
    if let Some(limit) = options.limit {
        command.insert("limit", limit);
    }
    if let Some(finalize) = &options.finalize {
        command.insert("finalize", Bson::from(finalize));
    }
    if let Some(scope) = &options.scope {
        command.insert("scope", scope.clone());
    }
    if options.verbose {
        command.insert("verbose", true);
    }

    AdminCommand::new(namespace.database(), command)
}

/// Timing and counts reported by a map-reduce.
#[derive(Debug, Clone, PartialEq)]
pub struct MapReduceStatistics {
    pub process_time_ms: i64,
    pub counts: Document,
    pub timing: Option<Document>,
}

/// What a map-reduce produced.
#[derive(Debug, Clone, PartialEq)]
pub enum MapReduceOutput {
    Inline {
        results: Vec<Document>,
        statistics: MapReduceStatistics,
    },
    Collection {
        name: String,
        statistics: MapReduceStatistics,
    },
}

/// Reads a map-reduce reply.
///
/// # Errors
///
/// Returns [`CommandError::Server`] if the reply reports failure or names no
/// output.
pub fn map_reduce_result(reply: &Document) -> CommandResult<MapReduceOutput> {
    if !is_ok(reply) {
        return Err(CommandError::server(
            reply
                .get_str("errmsg")
                .unwrap_or("map-reduce failed"),
        ));
    }

    let statistics = MapReduceStatistics {
        process_time_ms: number_field(reply, "timeMillis").unwrap_or(0),
        counts: reply.get_document("counts").cloned().unwrap_or_default(),
        timing: reply.get_document("timing").ok().cloned(),
    };

    if let Ok(results) = reply.get_array("results") {
        let results = results
            .iter()
            .filter_map(|result| match result {
                Bson::Document(document) => Some(document.clone()),
                _ => None,
            })
            .collect();
        return Ok(MapReduceOutput::Inline { results, statistics });
    }

    match reply.get("result") {
        Some(Bson::String(name)) => Ok(MapReduceOutput::Collection { name: name.clone(), statistics }),
        Some(Bson::Document(target)) => match target.get_str("collection") {
            Ok(name) => Ok(MapReduceOutput::Collection { name: name.to_string(), statistics }),
            Err(_) => Err(CommandError::server("map-reduce reply names no output collection")),
        },
        _ => Err(CommandError::server("map-reduce reply names no output collection")),
    }
}
