use std::fmt;

/// User-facing buckets produced by keyword sniffing on remote error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    System,
    Safety,
    Quota,
    Overloaded,
    Auth,
    Captcha,
    Timeout,
    Network,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            Self::System => "SYSTEM_ERROR",
            Self::Safety => "SAFETY_ERROR",
            Self::Quota => "QUOTA_ERROR",
            Self::Overloaded => "OVERLOADED_ERROR",
            Self::Auth => "AUTH_ERROR",
            Self::Captcha => "CAPTCHA_ERROR",
            Self::Timeout => "TIMEOUT_ERROR",
            Self::Network => "NETWORK_ERROR",
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::System => "Lỗi hệ thống từ máy chủ tạo ảnh. Vui lòng thử lại sau.",
            Self::Safety => {
                "Nội dung bị chặn bởi bộ lọc an toàn. Vui lòng thay đổi mô tả hoặc hình ảnh."
            }
            Self::Quota => "Đã vượt giới hạn yêu cầu (429). Vui lòng thử lại sau ít phút.",
            Self::Overloaded => "Máy chủ AI đang quá tải. Vui lòng thử lại sau.",
            Self::Auth => "Phiên xác thực với dịch vụ đã hết hạn. Vui lòng liên hệ quản trị viên.",
            Self::Captcha => "Dịch vụ yêu cầu xác minh captcha. Vui lòng thử lại sau.",
            Self::Timeout => "Quá thời gian chờ phản hồi từ máy chủ. Vui lòng thử lại.",
            Self::Network => "Lỗi kết nối mạng. Vui lòng kiểm tra kết nối và thử lại.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Không nhận được mã tác vụ từ máy chủ.")]
    NoTaskId,
    #[error("{message}")]
    RemoteFailure { message: String },
    #[error("Quá thời gian chờ kết quả sau {attempts} lần kiểm tra. Vui lòng thử lại.")]
    Timeout { attempts: u32 },
    #[error("Lỗi tạm thời khi kiểm tra trạng thái: {message}")]
    Transient { message: String },
    #[error("Upscale error: {0}")]
    Upscale(Box<JobError>),
    #[error("Không nhận được dữ liệu ảnh.")]
    NoImageData,
    #[error("{}", category_message(.category))]
    Categorized {
        category: ErrorCategory,
        detail: String,
    },
    #[error("Ảnh đầu vào không hợp lệ: {message}")]
    InvalidInput { message: String },
    #[error("Phản hồi không hợp lệ từ máy chủ: {message}")]
    InvalidPayload { message: String },
    #[error("Không có khóa API khả dụng: {message}")]
    Credentials { message: String },
}

fn category_message(category: &ErrorCategory) -> &'static str {
    category.user_message()
}

impl JobError {
    pub fn categorized(category: ErrorCategory, detail: impl Into<String>) -> Self {
        Self::Categorized {
            category,
            detail: detail.into(),
        }
    }

    pub fn upscale(inner: JobError) -> Self {
        Self::Upscale(Box::new(inner))
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Categorized { category, .. } => Some(*category),
            Self::Timeout { .. } => Some(ErrorCategory::Timeout),
            Self::Upscale(inner) => inner.category(),
            _ => None,
        }
    }

    /// Poll budget exhaustion and transport timeouts both count.
    pub fn is_timeout(&self) -> bool {
        self.category() == Some(ErrorCategory::Timeout)
    }

    /// Closed set of errors that end a poll loop instead of being treated as
    /// "still processing".
    pub fn aborts_polling(&self) -> bool {
        match self {
            Self::RemoteFailure { .. }
            | Self::NoImageData
            | Self::NoTaskId
            | Self::Credentials { .. }
            | Self::Upscale(_) => true,
            Self::Categorized { category, .. } => matches!(
                category,
                ErrorCategory::System
                    | ErrorCategory::Auth
                    | ErrorCategory::Captcha
                    | ErrorCategory::Safety
            ),
            Self::Timeout { .. }
            | Self::Transient { .. }
            | Self::InvalidInput { .. }
            | Self::InvalidPayload { .. } => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NoTaskId => "NO_TASK_ID",
            Self::RemoteFailure { .. } => "REMOTE_FAILURE",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::Transient { .. } => "TRANSIENT_POLL_ERROR",
            Self::Upscale(_) => "UPSCALE_ERROR",
            Self::NoImageData => "NO_IMAGE_DATA",
            Self::Categorized { category, .. } => category.code(),
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::InvalidPayload { .. } => "INVALID_PAYLOAD",
            Self::Credentials { .. } => "CREDENTIALS_ERROR",
        }
    }

    /// Raw diagnostic text, separate from the Vietnamese display message.
    pub fn detail(&self) -> String {
        match self {
            Self::Categorized { detail, .. } => detail.clone(),
            Self::Upscale(inner) => inner.detail(),
            Self::RemoteFailure { message }
            | Self::Transient { message }
            | Self::InvalidInput { message }
            | Self::InvalidPayload { message }
            | Self::Credentials { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
