//! 当前会话控制器
//!
//! 状态只有两种：未选中 / 已选中某个会话。每次选中都返回本次需要执行的副作用，
//! 由调用方（客户端 + UI）负责落实。

/// 选中状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    Selected(String),
}

/// 一次选中产生的副作用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionEffects {
    pub conversation_id: String,
    /// 需要以 INITIAL 模式拉取首屏
    pub initial_load: bool,
    /// 视图需要滚动到底部
    pub scroll_to_bottom: bool,
    /// 发送已读回执，每次选中都会发（允许重复）
    pub emit_read_receipt: bool,
}

#[derive(Debug, Default)]
pub struct ActiveConversationController {
    selection: Selection,
    /// 上一次观察到的会话 ID，用于区分“真正切换”与“重复选中”
    last_observed: Option<String>,
}

impl ActiveConversationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 选中会话
    ///
    /// `needs_backfill`：该会话的消息列表还没有首屏数据。
    pub fn select(&mut self, conversation_id: &str, needs_backfill: bool) -> SelectionEffects {
        let is_new = self.last_observed.as_deref() != Some(conversation_id);
        self.selection = Selection::Selected(conversation_id.to_string());
        self.last_observed = Some(conversation_id.to_string());

        SelectionEffects {
            conversation_id: conversation_id.to_string(),
            initial_load: needs_backfill,
            // 重复选中同一会话时不抢滚动位置，避免与分页恢复逻辑冲突
            scroll_to_bottom: needs_backfill || is_new,
            emit_read_receipt: true,
        }
    }

    pub fn active(&self) -> Option<&str> {
        match &self.selection {
            Selection::Selected(id) => Some(id),
            Selection::None => None,
        }
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active() == Some(conversation_id)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// 回到未选中状态（登出、会话被删除）
    pub fn clear(&mut self) {
        self.selection = Selection::None;
        self.last_observed = None;
    }
}
