//! 团队凭据与 Basic 认证校验。

use axum::http::HeaderMap;
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};

#[derive(Debug, Clone)]
pub struct Team {
    username: String,
    password: String,
}

impl Team {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.username
    }

    /// 用户名与密码须逐字节一致。
    pub fn authenticate(&self, credentials: &Authorization<Basic>) -> bool {
        credentials.username() == self.username && credentials.password() == self.password
    }
}

/// The fixed set of teams, configured once at startup.
#[derive(Debug)]
pub struct TeamRegistry {
    teams: Vec<Team>,
}

impl TeamRegistry {
    pub fn new(teams: Vec<Team>) -> Result<Self, String> {
        if teams.is_empty() {
            return Err("at least one team must be configured".into());
        }
        for (index, team) in teams.iter().enumerate() {
            validate_team_name(&team.username)?;
            if team.password.is_empty() {
                return Err(format!("team '{}' has an empty password", team.username));
            }
            if teams[..index]
                .iter()
                .any(|other| other.username.eq_ignore_ascii_case(&team.username))
            {
                return Err(format!("team '{}' is configured twice", team.username));
            }
        }
        Ok(Self { teams })
    }

    /// 解析 `name:password,name:password` 形式的团队列表。
    pub fn parse(list: &str) -> Result<Self, String> {
        let teams = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .split_once(':')
                    .map(|(name, password)| Team::new(name.trim(), password))
                    .ok_or_else(|| format!("team entry '{entry}' must be name:password"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(teams)
    }

    /// 按 URL 路径查找团队：去掉首尾 `/` 后须与团队名完全一致（忽略大小写）。
    pub fn resolve(&self, path: &str) -> Option<&Team> {
        let segment = path.trim_matches('/');
        if segment.is_empty() {
            return None;
        }
        self.teams
            .iter()
            .find(|team| team.username.eq_ignore_ascii_case(segment))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.teams.iter().map(Team::name)
    }
}

/// 从请求头中提取 Basic 凭据；缺失或格式错误时返回 None。
pub fn basic_credentials(headers: &HeaderMap) -> Option<Authorization<Basic>> {
    headers.typed_get::<Authorization<Basic>>()
}

fn validate_team_name(name: &str) -> Result<(), String> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(format!("team name '{name}' is not a valid path segment"))
    }
}
