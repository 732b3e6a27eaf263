use crate::constant::CommandByte;
use crate::protocol::primitive::write_int_1;

/// Serialize a command packet payload: opcode byte plus optional argument.
pub fn write_command(out: &mut Vec<u8>, cmd: CommandByte, arg: &[u8]) {
    write_int_1(out, cmd as u8);
    out.extend_from_slice(arg);
}
