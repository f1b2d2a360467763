use crate::resp::code;
use crate::Message;

pub(crate) fn msg_summary(msg: &Message) -> String {
  format!("{:?}: {:?} {} with {} byte payload",
          msg.code.kind(),
          msg.ty,
          code::dotted(msg.code),
          msg.payload.0.len())
}
