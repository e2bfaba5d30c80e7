//! Per-method RPC policy, looked up by fully-qualified method name.

use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetResource {
    #[default]
    None,
    User,
    Project,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RpcPolicy {
    pub anonymous: bool,
    pub no_log: bool,
    pub target_resource: TargetResource,
    pub owner_only: bool,
    pub root_admin_only: bool,
}

impl RpcPolicy {
    #[must_use]
    pub const fn targeting(target_resource: TargetResource) -> Self {
        Self {
            anonymous: false,
            no_log: false,
            target_resource,
            owner_only: false,
            root_admin_only: false,
        }
    }

    #[must_use]
    pub const fn anonymous(self) -> Self {
        Self {
            anonymous: true,
            ..self
        }
    }

    #[must_use]
    pub const fn no_log(self) -> Self {
        Self {
            no_log: true,
            ..self
        }
    }

    #[must_use]
    pub const fn owner_only(self) -> Self {
        Self {
            owner_only: true,
            ..self
        }
    }

    #[must_use]
    pub const fn root_admin_only(self) -> Self {
        Self {
            root_admin_only: true,
            ..self
        }
    }
}

pub struct MethodDescriptor {
    pub name: &'static str,
    pub policy: RpcPolicy,
}

pub mod methods {
    pub const CHECK_HEALTH: &str = "/bulwark.v1.HealthService/CheckHealth";

    pub const CREATE_USER: &str = "/bulwark.v1.UserService/CreateUser";
    pub const GET_USER: &str = "/bulwark.v1.UserService/GetUser";
    pub const DELETE_USER: &str = "/bulwark.v1.UserService/DeleteUser";
    pub const RESOLVE_INVITATION: &str = "/bulwark.v1.UserService/ResolveInvitation";

    pub const LIST_PROJECTS: &str = "/bulwark.v1.ProjectService/ListProjects";
    pub const CREATE_PROJECT: &str = "/bulwark.v1.ProjectService/CreateProject";
    pub const DELETE_PROJECT: &str = "/bulwark.v1.ProjectService/DeleteProject";
    pub const LIST_CHILD_PROJECTS: &str = "/bulwark.v1.ProjectService/ListChildProjects";
    pub const CREATE_INVITATION: &str = "/bulwark.v1.ProjectService/CreateInvitation";

    pub const LIST_PROVIDERS: &str = "/bulwark.v1.ProviderService/ListProviders";
    pub const GET_PROVIDER: &str = "/bulwark.v1.ProviderService/GetProvider";

    pub const CREATE_RULE_TYPE: &str = "/bulwark.v1.RuleTypeService/CreateRuleType";
    pub const UPDATE_RULE_TYPE: &str = "/bulwark.v1.RuleTypeService/UpdateRuleType";
    pub const DELETE_RULE_TYPE: &str = "/bulwark.v1.RuleTypeService/DeleteRuleType";
    pub const LIST_RULE_TYPES: &str = "/bulwark.v1.RuleTypeService/ListRuleTypes";
    pub const GET_RULE_TYPE_BY_NAME: &str = "/bulwark.v1.RuleTypeService/GetRuleTypeByName";
    pub const GET_RULE_TYPE_BY_ID: &str = "/bulwark.v1.RuleTypeService/GetRuleTypeById";

    pub const CREATE_PROFILE: &str = "/bulwark.v1.ProfileService/CreateProfile";
    pub const UPDATE_PROFILE: &str = "/bulwark.v1.ProfileService/UpdateProfile";
    pub const DELETE_PROFILE: &str = "/bulwark.v1.ProfileService/DeleteProfile";
    pub const LIST_PROFILES: &str = "/bulwark.v1.ProfileService/ListProfiles";
    pub const GET_PROFILE_BY_ID: &str = "/bulwark.v1.ProfileService/GetProfileById";
    pub const GET_PROFILE_STATUS_BY_NAME: &str =
        "/bulwark.v1.ProfileService/GetProfileStatusByName";

    pub const GET_USER_BY_SUBJECT: &str = "/bulwark.v1.AdminService/GetUserBySubject";
}

const USER: RpcPolicy = RpcPolicy::targeting(TargetResource::User);
const PROJECT: RpcPolicy = RpcPolicy::targeting(TargetResource::Project);

/// Method metadata for every RPC the server exposes.
pub static METHODS: &[MethodDescriptor] = &[
    MethodDescriptor {
        name: methods::CHECK_HEALTH,
        policy: RpcPolicy::targeting(TargetResource::None).anonymous().no_log(),
    },
    MethodDescriptor {
        name: methods::CREATE_USER,
        policy: USER,
    },
    MethodDescriptor {
        name: methods::GET_USER,
        policy: USER,
    },
    MethodDescriptor {
        name: methods::DELETE_USER,
        policy: USER,
    },
    MethodDescriptor {
        name: methods::RESOLVE_INVITATION,
        policy: USER,
    },
    MethodDescriptor {
        name: methods::LIST_PROJECTS,
        policy: USER,
    },
    MethodDescriptor {
        name: methods::CREATE_PROJECT,
        policy: PROJECT.owner_only(),
    },
    MethodDescriptor {
        name: methods::DELETE_PROJECT,
        policy: PROJECT.owner_only(),
    },
    MethodDescriptor {
        name: methods::LIST_CHILD_PROJECTS,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::CREATE_INVITATION,
        policy: PROJECT.owner_only(),
    },
    MethodDescriptor {
        name: methods::LIST_PROVIDERS,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::GET_PROVIDER,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::CREATE_RULE_TYPE,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::UPDATE_RULE_TYPE,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::DELETE_RULE_TYPE,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::LIST_RULE_TYPES,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::GET_RULE_TYPE_BY_NAME,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::GET_RULE_TYPE_BY_ID,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::CREATE_PROFILE,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::UPDATE_PROFILE,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::DELETE_PROFILE,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::LIST_PROFILES,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::GET_PROFILE_BY_ID,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::GET_PROFILE_STATUS_BY_NAME,
        policy: PROJECT,
    },
    MethodDescriptor {
        name: methods::GET_USER_BY_SUBJECT,
        policy: RpcPolicy::targeting(TargetResource::None).root_admin_only(),
    },
];

pub struct PolicyIndex {
    by_method: HashMap<&'static str, RpcPolicy>,
}

impl PolicyIndex {
    #[must_use]
    pub fn from_methods(methods: &[MethodDescriptor]) -> Self {
        Self {
            by_method: methods.iter().map(|m| (m.name, m.policy)).collect(),
        }
    }

    /// Policy for `method`; unknown methods get the default (authenticated,
    /// no target).
    #[must_use]
    pub fn lookup(&self, method: &str) -> RpcPolicy {
        self.by_method.get(method).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.by_method.contains_key(method)
    }
}

static INDEX: LazyLock<PolicyIndex> = LazyLock::new(|| PolicyIndex::from_methods(METHODS));

/// The process-wide index, built on first use.
pub fn policy_index() -> &'static PolicyIndex {
    &INDEX
}
