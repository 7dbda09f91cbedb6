// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Closed registries of the operations the engine exposes

use crate::error::EngineError;
use std::fmt;
use std::str::FromStr;

/// Long-running operations served over the duplex gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamOperation {
    Clone,
    Push,
    Pull,
    Fetch,
    Checkout,
    GetRemoteInfo,
    ListServerRefs,
}

impl StreamOperation {
    pub const ALL: [StreamOperation; 7] = [
        StreamOperation::Clone,
        StreamOperation::Push,
        StreamOperation::Pull,
        StreamOperation::Fetch,
        StreamOperation::Checkout,
        StreamOperation::GetRemoteInfo,
        StreamOperation::ListServerRefs,
    ];

    /// Wire name, also the route segment and event prefix
    pub const fn as_str(self) -> &'static str {
        match self {
            StreamOperation::Clone => "clone",
            StreamOperation::Push => "push",
            StreamOperation::Pull => "pull",
            StreamOperation::Fetch => "fetch",
            StreamOperation::Checkout => "checkout",
            StreamOperation::GetRemoteInfo => "getRemoteInfo",
            StreamOperation::ListServerRefs => "listServerRefs",
        }
    }

    /// Whether the payload must name a local repository directory
    pub const fn needs_dir(self) -> bool {
        !matches!(
            self,
            StreamOperation::GetRemoteInfo | StreamOperation::ListServerRefs
        )
    }
}

impl fmt::Display for StreamOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamOperation {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamOperation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| EngineError::UnknownOperation(s.to_string()))
    }
}

macro_rules! commands {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Short request/response operations, one `POST /git/<name>` route each
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Command {
            $($variant),+
        }

        impl Command {
            pub const ALL: &'static [Command] = &[$(Command::$variant),+];

            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Command::$variant => $name),+
                }
            }
        }
    };
}

commands! {
    // Repository
    Init => "init",
    Commit => "commit",
    Log => "log",
    FastForward => "fastForward",
    Merge => "merge",
    AbortMerge => "abortMerge",
    Stash => "stash",
    // Config
    SetConfig => "setConfig",
    GetConfig => "getConfig",
    GetConfigAll => "getConfigAll",
    // Branches
    CurrentBranch => "currentBranch",
    CreateBranch => "createBranch",
    DeleteBranch => "deleteBranch",
    RenameBranch => "renameBranch",
    ListBranches => "listBranches",
    // Tags
    Tag => "tag",
    AnnotatedTag => "annotatedTag",
    DeleteTag => "deleteTag",
    ListTags => "listTags",
    // Files
    Add => "add",
    Remove => "remove",
    ListFiles => "listFiles",
    Status => "status",
    IsIgnored => "isIgnored",
    ReadFile => "readFile",
    DiscardFiles => "discardFiles",
    // Notes
    AddNote => "addNote",
    ReadNote => "readNote",
    RemoveNote => "removeNote",
    ListNotes => "listNotes",
    // Remotes
    AddRemote => "addRemote",
    DeleteRemote => "deleteRemote",
    ListRemotes => "listRemotes",
    // Objects
    ReadBlob => "readBlob",
    ReadCommit => "readCommit",
    ReadTag => "readTag",
    ReadTree => "readTree",
    WriteBlob => "writeBlob",
    WriteCommit => "writeCommit",
    WriteTree => "writeTree",
    ReadObject => "readObject",
    WriteObject => "writeObject",
    // Plumbing
    FindRoot => "findRoot",
    ExpandRef => "expandRef",
    ExpandOid => "expandOid",
    ResetIndex => "resetIndex",
    UpdateIndex => "updateIndex",
    ListRefs => "listRefs",
    ResolveRef => "resolveRef",
    WriteRef => "writeRef",
    DeleteRef => "deleteRef",
    HashBlob => "hashBlob",
    StatusMatrix => "statusMatrix",
    IsDescendent => "isDescendent",
    IndexPack => "indexPack",
    PackObjects => "packObjects",
    CollectOids => "collectOids",
    Version => "isomorphicGitVersion",
}

impl Command {
    /// Engine-side name reported as `caller` in request errors
    pub fn caller(self) -> String {
        format!("git.{}", self.as_str())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .copied()
            .find(|cmd| cmd.as_str() == s)
            .ok_or_else(|| EngineError::UnknownOperation(s.to_string()))
    }
}
