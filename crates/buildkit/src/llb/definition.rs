use super::platform::Platform;
use super::state::{State, Vertex};
use crate::digest::Digest;
use crate::proto::pb;
use anyhow::{Context, Result};
use prost::Message as ProstMessage;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

const CUSTOM_NAME_KEY: &str = "llb.customname";

/// A marshalled LLB graph: ops in dependency order, each addressed by the
/// sha256 of its encoding, followed by a terminal op naming the result.
#[derive(Debug, Clone)]
pub struct Definition {
    ops: Vec<(Digest, pb::Op)>,
    metadata: BTreeMap<String, pb::OpMetadata>,
}

struct Marshaller {
    platform: pb::Platform,
    visited: HashMap<*const Vertex, Digest>,
    emitted: HashSet<Digest>,
    ops: Vec<(Digest, pb::Op)>,
    metadata: BTreeMap<String, pb::OpMetadata>,
}

impl Marshaller {
    fn visit(&mut self, vertex: &Arc<Vertex>) -> Digest {
        let key = Arc::as_ptr(vertex);
        if let Some(digest) = self.visited.get(&key) {
            return digest.clone();
        }

        let inputs = vertex
            .inputs
            .iter()
            .map(|input| pb::Input {
                digest: self.visit(&input.vertex).to_string(),
                index: input.index,
            })
            .collect();

        let op = pb::Op {
            inputs,
            op: Some(vertex.op.clone()),
            platform: Some(
                vertex
                    .platform
                    .as_ref()
                    .map(Platform::to_pb)
                    .unwrap_or_else(|| self.platform.clone()),
            ),
        };
        let digest = Digest::sha256(&op.encode_to_vec());

        // identical vertices built independently collapse into one op
        if self.emitted.insert(digest.clone()) {
            if let Some(name) = &vertex.custom_name {
                self.metadata.insert(
                    digest.to_string(),
                    pb::OpMetadata {
                        ignore_cache: false,
                        description: BTreeMap::from([(
                            CUSTOM_NAME_KEY.to_string(),
                            name.clone(),
                        )]),
                        caps: BTreeMap::new(),
                    },
                );
            }
            self.ops.push((digest.clone(), op));
        }

        self.visited.insert(key, digest.clone());
        digest
    }
}

impl Definition {
    pub fn marshal(state: &State, platform: &Platform) -> Result<Self> {
        let mut m = Marshaller {
            platform: platform.to_pb(),
            visited: HashMap::new(),
            emitted: HashSet::new(),
            ops: Vec::new(),
            metadata: BTreeMap::new(),
        };

        let terminal = match &state.output {
            Some(output) => pb::Op {
                inputs: vec![pb::Input {
                    digest: m.visit(&output.vertex).to_string(),
                    index: output.index,
                }],
                op: None,
                platform: None,
            },
            None => pb::Op {
                inputs: vec![],
                op: None,
                platform: None,
            },
        };
        let digest = Digest::sha256(&terminal.encode_to_vec());
        m.ops.push((digest, terminal));

        let def = Self {
            ops: m.ops,
            metadata: m.metadata,
        };
        debug!("{}", def.describe());
        Ok(def)
    }

    pub fn to_pb(&self) -> pb::Definition {
        pb::Definition {
            def: self.ops.iter().map(|(_, op)| op.encode_to_vec()).collect(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_pb().encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let def = pb::Definition::decode(bytes).context("Failed to decode LLB definition")?;
        let ops = def
            .def
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                let op = pb::Op::decode(raw.as_slice())
                    .with_context(|| format!("Failed to decode op {}", i))?;
                Ok((Digest::sha256(raw), op))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            ops,
            metadata: def.metadata,
        })
    }

    /// Digest of the vertex the terminal op points at, `None` for scratch.
    pub fn head(&self) -> Option<Digest> {
        let (_, terminal) = self.ops.last()?;
        let input = terminal.inputs.first()?;
        Digest::parse(&input.digest).ok()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> impl Iterator<Item = (&Digest, &pb::Op)> {
        self.ops.iter().map(|(d, op)| (d, op))
    }

    pub fn op(&self, digest: &Digest) -> Option<&pb::Op> {
        self.ops.iter().find(|(d, _)| d == digest).map(|(_, op)| op)
    }

    pub fn exec_ops(&self) -> impl Iterator<Item = &pb::ExecOp> {
        self.ops.iter().filter_map(|(_, op)| match &op.op {
            Some(pb::op::Op::Exec(exec)) => Some(exec),
            _ => None,
        })
    }

    pub fn file_ops(&self) -> impl Iterator<Item = &pb::FileOp> {
        self.ops.iter().filter_map(|(_, op)| match &op.op {
            Some(pb::op::Op::File(file)) => Some(file),
            _ => None,
        })
    }

    pub fn source_identifiers(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|(_, op)| match &op.op {
                Some(pb::op::Op::Source(src)) => Some(src.identifier.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn custom_name(&self, digest: &Digest) -> Option<&str> {
        self.metadata
            .get(&digest.to_string())
            .and_then(|m| m.description.get(CUSTOM_NAME_KEY))
            .map(String::as_str)
    }

    /// Human readable dump of the graph, one op per line.
    pub fn describe(&self) -> String {
        let mut output = String::from("\n=== LLB Graph Structure ===\n\n");
        for (idx, (digest, op)) in self.ops.iter().enumerate() {
            output.push_str(&format!("{} ({}) -> ", idx, digest));

            match &op.op {
                Some(pb::op::Op::Source(source)) => {
                    match source.identifier.strip_prefix("docker-image://") {
                        Some(image) => output.push_str(&format!("FROM {}\n", image)),
                        None => output.push_str(&format!("SOURCE {}\n", source.identifier)),
                    }
                }
                Some(pb::op::Op::Exec(exec)) => {
                    match &exec.meta {
                        Some(meta) => output.push_str(&format!("EXEC {}\n", meta.args.join(" "))),
                        None => output.push_str("EXEC\n"),
                    }
                    for mount in &exec.mounts {
                        output.push_str(&format!(
                            "          {} ({}) -> {} -> {}",
                            mount.input,
                            mount_type_name(mount.mount_type),
                            mount.dest,
                            mount.output
                        ));
                        if let Some(cache) = &mount.cache_opt {
                            output.push_str(&format!(
                                " [cache id={} sharing={}]",
                                cache.id,
                                sharing_name(cache.sharing)
                            ));
                        }
                        output.push('\n');
                    }
                }
                Some(pb::op::Op::File(file)) => {
                    output.push_str(&format!("FILE ({} actions)\n", file.actions.len()));
                    for action in &file.actions {
                        output.push_str(&format!(
                            "          {} -> {}\n",
                            action.input,
                            file_action_summary(action)
                        ));
                    }
                }
                Some(pb::op::Op::Merge(merge)) => {
                    let inputs: Vec<String> =
                        merge.inputs.iter().map(|m| m.input.to_string()).collect();
                    output.push_str(&format!("MERGE ({})\n", inputs.join(", ")));
                }
                None => output.push_str("NONE\n"),
            }

            for (i, input) in op.inputs.iter().enumerate() {
                output.push_str(&format!(
                    "          input[{}]: digest={}, index={}\n",
                    i, input.digest, input.index
                ));
            }
        }
        output.push_str("\n=== End of Graph ===\n");
        output
    }
}

fn mount_type_name(value: i32) -> &'static str {
    match pb::MountType::try_from(value) {
        Ok(pb::MountType::Bind) => "BIND",
        Ok(pb::MountType::Secret) => "SECRET",
        Ok(pb::MountType::Ssh) => "SSH",
        Ok(pb::MountType::Cache) => "CACHE",
        Ok(pb::MountType::Tmpfs) => "TMPFS",
        Err(_) => "UNKNOWN",
    }
}

fn sharing_name(value: i32) -> &'static str {
    match pb::CacheSharingOpt::try_from(value) {
        Ok(pb::CacheSharingOpt::Shared) => "shared",
        Ok(pb::CacheSharingOpt::Private) => "private",
        Ok(pb::CacheSharingOpt::Locked) => "locked",
        Err(_) => "unknown",
    }
}

fn file_action_summary(action: &pb::FileAction) -> String {
    match &action.action {
        Some(pb::file_action::Action::Copy(c)) => {
            let mut s = format!("COPY {} {}", c.src, c.dest);
            if !c.include_patterns.is_empty() {
                s.push_str(&format!(" include={}", c.include_patterns.join(",")));
            }
            if !c.exclude_patterns.is_empty() {
                s.push_str(&format!(" exclude={}", c.exclude_patterns.join(",")));
            }
            s
        }
        Some(pb::file_action::Action::Mkfile(f)) => format!("MKFILE {}", f.path),
        Some(pb::file_action::Action::Mkdir(d)) => format!("MKDIR {}", d.path),
        Some(pb::file_action::Action::Rm(r)) => format!("RM {}", r.path),
        None => "NONE".to_string(),
    }
}
